//! Parsed module layout and program metadata handed over by a format parser

use nx_core::error::{EmulatorError, LoaderError};
use nx_memory::pages::page_align_up;
use nx_memory::{PageFlags, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// Default main-thread stack (1 MB)
pub const DEFAULT_STACK_SIZE: u64 = 0x10_0000;

/// Default main-thread priority
pub const DEFAULT_MAIN_THREAD_PRIORITY: u32 = 44;

/// Process-level settings the parser extracted from the program's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramMetadata {
    pub title_id: u64,
    pub name: String,
    pub main_thread_priority: u32,
    pub main_thread_core: i32,
    pub main_thread_stack_size: u64,
}

impl Default for ProgramMetadata {
    fn default() -> Self {
        Self {
            title_id: 0x0100_0000_0000_1000,
            name: "application".to_string(),
            main_thread_priority: DEFAULT_MAIN_THREAD_PRIORITY,
            main_thread_core: 0,
            main_thread_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl ProgramMetadata {
    /// Read metadata from a TOML file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self, EmulatorError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| EmulatorError::Config(e.to_string()))
    }
}

/// Which part of the module a segment holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    Rodata,
    Data,
}

impl SegmentKind {
    /// Final guest permissions once loading is done
    pub fn flags(self) -> PageFlags {
        match self {
            Self::Text => PageFlags::RX,
            Self::Rodata => PageFlags::READ,
            Self::Data => PageFlags::RW,
        }
    }
}

/// One contiguous chunk of the image, `offset` bytes from the load base
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl Segment {
    pub fn new(offset: u64, bytes: Vec<u8>) -> Self {
        Self { offset, bytes }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// End offset, `None` if it overflows
    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.len())
    }

    /// End offset, saturating. Only meaningful once the module validated.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.len())
    }
}

/// Segments of a parsed executable, relative to its load base
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub text: Segment,
    pub rodata: Segment,
    pub data: Segment,
    /// Zero-filled bytes directly after `data`
    pub bss_size: u64,
    /// Entry point, relative to the load base
    pub entry_offset: u64,
}

impl ModuleInfo {
    /// Raw code image: everything is text and execution starts at offset 0
    pub fn flat(image: Vec<u8>) -> Self {
        Self {
            text: Segment::new(0, image),
            ..Self::default()
        }
    }

    /// Bytes the module occupies once loaded, page-rounded
    pub fn image_size(&self) -> u64 {
        let end = self
            .text
            .end()
            .max(self.rodata.end())
            .max(self.data.end().saturating_add(self.bss_size));
        page_align_up(end).unwrap_or(u64::MAX)
    }

    /// Page-rounded range and final permissions of every non-empty part.
    /// The bss shares the data range.
    pub fn regions(&self) -> Vec<(SegmentKind, Range<u64>)> {
        let mut regions = Vec::with_capacity(3);
        let mut push = |kind, start: u64, end: u64| {
            if end > start {
                regions.push((kind, start..page_align_up(end).unwrap_or(u64::MAX)));
            }
        };
        push(SegmentKind::Text, self.text.offset, self.text.end());
        push(SegmentKind::Rodata, self.rodata.offset, self.rodata.end());
        push(
            SegmentKind::Data,
            self.data.offset,
            self.data.end().saturating_add(self.bss_size),
        );
        regions
    }

    /// Check the layout before anything touches guest memory
    pub fn validate(&self) -> Result<(), LoaderError> {
        if self.text.is_empty() {
            return Err(LoaderError::InvalidModule("module has no text".to_string()));
        }
        let segments = [&self.text, &self.rodata, &self.data];
        if segments.iter().any(|s| s.offset % PAGE_SIZE != 0) {
            return Err(LoaderError::InvalidModule(
                "segment offsets must be page aligned".to_string(),
            ));
        }
        if let Some(kind) = [SegmentKind::Text, SegmentKind::Rodata, SegmentKind::Data]
            .into_iter()
            .zip(segments)
            .find_map(|(kind, s)| s.checked_end().and_then(page_align_up).is_none().then_some(kind))
        {
            return Err(LoaderError::InvalidModule(format!(
                "{:?} segment overflows the address space",
                kind
            )));
        }
        if self
            .data
            .end()
            .checked_add(self.bss_size)
            .and_then(page_align_up)
            .is_none()
        {
            return Err(LoaderError::InvalidModule("bss overflows the address space".to_string()));
        }

        let regions = self.regions();
        for pair in regions.windows(2) {
            let (first, second) = (&pair[0], &pair[1]);
            if first.1.end > second.1.start {
                return Err(LoaderError::InvalidModule(format!(
                    "{:?} overlaps {:?}",
                    first.0, second.0
                )));
            }
        }

        if self.entry_offset < self.text.offset
            || self.entry_offset >= self.text.end()
            || self.entry_offset % 4 != 0
        {
            return Err(LoaderError::InvalidModule(format!(
                "entry offset 0x{:x} is not an instruction in text",
                self.entry_offset
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn split_module() -> ModuleInfo {
        ModuleInfo {
            text: Segment::new(0, vec![0x1F; 0x1800]),
            rodata: Segment::new(0x2000, vec![0xAA; 0x10]),
            data: Segment::new(0x3000, vec![0xBB; 0x20]),
            bss_size: 0x2000,
            entry_offset: 0x100,
        }
    }

    #[test]
    fn test_flat_module() {
        let module = ModuleInfo::flat(vec![0; 0x1004]);
        module.validate().unwrap();
        assert_eq!(module.image_size(), 0x2000);
        assert_eq!(module.entry_offset, 0);
        assert_eq!(module.regions(), vec![(SegmentKind::Text, 0..0x2000)]);
    }

    #[test]
    fn test_split_module_regions() {
        let module = split_module();
        module.validate().unwrap();
        assert_eq!(module.image_size(), 0x6000);
        assert_eq!(
            module.regions(),
            vec![
                (SegmentKind::Text, 0..0x2000),
                (SegmentKind::Rodata, 0x2000..0x3000),
                (SegmentKind::Data, 0x3000..0x6000),
            ]
        );
    }

    #[test]
    fn test_validate_rejects_bad_layouts() {
        assert!(ModuleInfo::default().validate().is_err());

        let mut module = split_module();
        module.rodata.offset = 0x1000;
        assert!(module.validate().is_err());

        let mut module = split_module();
        module.data.offset = 0x3010;
        assert!(module.validate().is_err());

        let mut module = split_module();
        module.entry_offset = 0x1800;
        assert!(module.validate().is_err());

        let mut module = split_module();
        module.entry_offset = 0x102;
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_segments() {
        let mut module = split_module();
        module.data.offset = u64::MAX & !(PAGE_SIZE - 1);
        module.data.bytes = vec![0; PAGE_SIZE as usize + 1];
        assert!(matches!(
            module.validate(),
            Err(LoaderError::InvalidModule(message)) if message.contains("Data")
        ));
        assert_eq!(module.data.checked_end(), None);
        assert_eq!(module.image_size(), u64::MAX);

        let mut module = split_module();
        module.bss_size = u64::MAX - 0x3000;
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_metadata_defaults_fill_missing_keys() {
        let metadata: ProgramMetadata = toml::from_str("name = \"demo\"\nmain_thread_core = 1\n").unwrap();
        assert_eq!(metadata.name, "demo");
        assert_eq!(metadata.main_thread_core, 1);
        assert_eq!(metadata.main_thread_priority, DEFAULT_MAIN_THREAD_PRIORITY);
        assert_eq!(metadata.main_thread_stack_size, DEFAULT_STACK_SIZE);
    }

    proptest! {
        #[test]
        fn prop_flat_image_fits(len in 4usize..0x10000) {
            let module = ModuleInfo::flat(vec![0; len & !3]);
            prop_assert!(module.validate().is_ok());
            let size = module.image_size();
            prop_assert_eq!(size % PAGE_SIZE, 0);
            prop_assert!(size >= (len & !3) as u64);
            prop_assert!(size < (len as u64) + PAGE_SIZE);
        }
    }
}
