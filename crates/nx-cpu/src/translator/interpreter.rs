//! Block-caching interpreter
//!
//! Guest code is decoded one basic block at a time and the decoded block is
//! cached by start address. Halt requests and cross-core invalidations are
//! only looked at between blocks.

use super::decoder::{self, Instruction};
use super::exec::{Executor, Flow};
use super::{
    Exception, HaltHandle, Translator, TranslatorConfig, TranslatorEnv, TranslatorHalt,
};
use crate::registers::RegisterFile;
use nx_core::error::CpuError;
use nx_core::VAddr;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A decoded run of instructions ending at a terminator
#[derive(Debug)]
struct Block {
    start: u64,
    /// One past the last instruction byte
    end: u64,
    instructions: Vec<Instruction>,
}

impl Block {
    fn overlaps(&self, addr: VAddr, size: u64) -> bool {
        self.start < addr.saturating_add(size) && addr < self.end
    }
}

/// Default [`Translator`] used by the interpreter backend
pub struct BlockTranslator {
    config: TranslatorConfig,
    regs: RegisterFile,
    halt: HaltHandle,
    blocks: HashMap<u64, Arc<Block>>,
}

impl BlockTranslator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self {
            config,
            regs: RegisterFile::default(),
            halt: HaltHandle::new(),
            blocks: HashMap::new(),
        }
    }

    /// Number of cached blocks
    pub fn cached_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn translate(&self, env: &mut dyn TranslatorEnv, start: u64) -> Option<Block> {
        let limit = self.config.max_block_instructions.max(1);
        let mut instructions = Vec::new();
        let mut pc = start;

        while instructions.len() < limit {
            let Some(raw) = env.read_code(pc) else {
                break;
            };
            let instruction = decoder::decode(raw);
            instructions.push(instruction);
            pc = pc.wrapping_add(4);
            if instruction.ends_block() {
                break;
            }
        }

        if instructions.is_empty() {
            return None;
        }
        trace!(
            "Core {} translated block 0x{:x}..0x{:x} ({} instructions)",
            self.config.core_index,
            start,
            pc,
            instructions.len()
        );
        Some(Block {
            start,
            end: pc,
            instructions,
        })
    }

    fn block_at(&mut self, env: &mut dyn TranslatorEnv, pc: u64) -> Option<Arc<Block>> {
        if let Some(block) = self.blocks.get(&pc) {
            return Some(Arc::clone(block));
        }
        let block = Arc::new(self.translate(env, pc)?);
        self.blocks.insert(pc, Arc::clone(&block));
        Some(block)
    }

    /// Execute one block; the register file ends at the next block's start
    fn run_block(&mut self, env: &mut dyn TranslatorEnv, block: &Block) -> Result<(), CpuError> {
        let mut executor = Executor {
            regs: &mut self.regs,
            env,
            config: &self.config,
        };
        let mut pc = block.start;
        let mut invalidate = None;

        for instruction in &block.instructions {
            executor.regs.pc = pc.wrapping_add(4);
            match executor.execute(pc, instruction) {
                Ok(Flow::Next) => pc = pc.wrapping_add(4),
                Ok(Flow::Jump(target)) => {
                    executor.regs.pc = target;
                    break;
                }
                Ok(Flow::EndBlock) => break,
                Ok(Flow::Invalidate(range)) => {
                    invalidate = Some(range);
                    break;
                }
                Err(e) => {
                    executor.regs.pc = pc;
                    return Err(e);
                }
            }
        }

        match invalidate {
            Some(Some((addr, size))) => self.invalidate_cache_range(addr, size),
            Some(None) => self.clear_cache(),
            None => {}
        }
        Ok(())
    }
}

impl Translator for BlockTranslator {
    fn run(&mut self, env: &mut dyn TranslatorEnv) -> Result<TranslatorHalt, CpuError> {
        loop {
            for (addr, size) in env.take_invalidations() {
                self.invalidate_cache_range(addr, size);
            }

            let halt = self.halt.take();
            if !halt.is_empty() {
                return Ok(halt);
            }

            let pc = self.regs.pc;
            let Some(block) = self.block_at(env, pc) else {
                env.exception_raised(pc, Exception::NoExecuteFault)?;
                return Err(CpuError::Exception {
                    pc,
                    exception: Exception::NoExecuteFault.name(),
                });
            };
            self.run_block(env, &block)?;
        }
    }

    fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    fn invalidate_cache_range(&mut self, addr: VAddr, size: u64) {
        let before = self.blocks.len();
        self.blocks.retain(|_, block| !block.overlaps(addr, size));
        let dropped = before - self.blocks.len();
        if dropped > 0 {
            debug!(
                "Core {} dropped {} block(s) overlapping 0x{:x}+0x{:x}",
                self.config.core_index, dropped, addr, size
            );
        }
    }

    fn clear_cache(&mut self) {
        self.blocks.clear();
    }

    fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}
