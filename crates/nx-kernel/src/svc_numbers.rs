//! Horizon supervisor call numbers

// Memory management
pub const SVC_SET_HEAP_SIZE: u32 = 0x01;
pub const SVC_QUERY_MEMORY: u32 = 0x06;

// Process management
pub const SVC_EXIT_PROCESS: u32 = 0x07;
pub const SVC_GET_PROCESS_ID: u32 = 0x24;

// Thread management
pub const SVC_CREATE_THREAD: u32 = 0x08;
pub const SVC_START_THREAD: u32 = 0x09;
pub const SVC_EXIT_THREAD: u32 = 0x0A;
pub const SVC_SLEEP_THREAD: u32 = 0x0B;
pub const SVC_GET_THREAD_PRIORITY: u32 = 0x0C;
pub const SVC_SET_THREAD_PRIORITY: u32 = 0x0D;
pub const SVC_GET_CURRENT_PROCESSOR_NUMBER: u32 = 0x10;
pub const SVC_GET_THREAD_ID: u32 = 0x25;

// Handles
pub const SVC_CLOSE_HANDLE: u32 = 0x16;

// Time
pub const SVC_GET_SYSTEM_TICK: u32 = 0x1E;

// Debug
pub const SVC_BREAK: u32 = 0x26;
pub const SVC_OUTPUT_DEBUG_STRING: u32 = 0x27;

// System information
pub const SVC_GET_INFO: u32 = 0x29;

/// Human-readable SVC name for logging
pub fn svc_name(number: u32) -> &'static str {
    match number {
        SVC_SET_HEAP_SIZE => "SetHeapSize",
        SVC_QUERY_MEMORY => "QueryMemory",
        SVC_EXIT_PROCESS => "ExitProcess",
        SVC_CREATE_THREAD => "CreateThread",
        SVC_START_THREAD => "StartThread",
        SVC_EXIT_THREAD => "ExitThread",
        SVC_SLEEP_THREAD => "SleepThread",
        SVC_GET_THREAD_PRIORITY => "GetThreadPriority",
        SVC_SET_THREAD_PRIORITY => "SetThreadPriority",
        SVC_GET_CURRENT_PROCESSOR_NUMBER => "GetCurrentProcessorNumber",
        SVC_CLOSE_HANDLE => "CloseHandle",
        SVC_GET_SYSTEM_TICK => "GetSystemTick",
        SVC_GET_PROCESS_ID => "GetProcessId",
        SVC_GET_THREAD_ID => "GetThreadId",
        SVC_BREAK => "Break",
        SVC_OUTPUT_DEBUG_STRING => "OutputDebugString",
        SVC_GET_INFO => "GetInfo",
        _ => "Unknown",
    }
}
