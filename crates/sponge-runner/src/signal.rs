#![forbid(unsafe_code)]

//! Shared-memory signalling between the coordinator and a worker.
//!
//! Two buffers cross the thread boundary without a message round trip:
//!
//! - the **interrupt buffer**, one byte written by the coordinator and
//!   polled by the runtime before every statement;
//! - the **key-down buffer**, 256 bytes written by the coordinator on key
//!   events and read by `is_key_down` in the runtime.
//!
//! Both keep single-writer discipline. The coordinator is the only writer;
//! the worker only reads. Nothing structured is ever stored here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// No interrupt pending.
pub const INTERRUPT_CLEAR: u8 = 0;

/// Cooperative cancellation request. Also used as the soft-reset sentinel.
pub const INTERRUPT_SIGINT: u8 = 2;

/// Single interrupt byte.
#[derive(Debug, Clone, Default)]
pub struct InterruptBuffer {
    flag: Arc<AtomicU8>,
}

impl InterruptBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u8) {
        self.flag.store(value, Ordering::Release);
    }

    pub fn clear(&self) {
        self.set(INTERRUPT_CLEAR);
    }

    #[must_use]
    pub fn get(&self) -> u8 {
        self.flag.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.get() != INTERRUPT_CLEAR
    }
}

/// Key state indexed by virtual key code. Code 0 is never written.
#[derive(Debug, Clone)]
pub struct KeyDownBuffer {
    keys: Arc<[AtomicU8; 256]>,
}

impl Default for KeyDownBuffer {
    fn default() -> Self {
        Self {
            keys: Arc::new(std::array::from_fn(|_| AtomicU8::new(0))),
        }
    }
}

impl KeyDownBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` for code 0, which is reserved.
    pub fn press(&self, code: u8) -> bool {
        self.write(code, 1)
    }

    pub fn release(&self, code: u8) -> bool {
        self.write(code, 0)
    }

    fn write(&self, code: u8, value: u8) -> bool {
        if code == 0 {
            return false;
        }
        self.keys[usize::from(code)].store(value, Ordering::Release);
        true
    }

    #[must_use]
    pub fn is_down(&self, code: u8) -> bool {
        self.keys[usize::from(code)].load(Ordering::Acquire) > 0
    }
}

/// The pair handed to a worker via `setSharedBuffers`.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffers {
    pub interrupt: InterruptBuffer,
    pub key_down: KeyDownBuffer,
}

impl SharedBuffers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Map a key name (as reported by a keyboard event) to a Windows virtual
/// key code. Letters map to their upper-case code; names without a code
/// map to `None`.
#[must_use]
pub fn key_to_vm_code(key: &str) -> Option<u8> {
    let code = match key {
        "Backspace" => 8,
        "Tab" => 9,
        "Enter" => 13,
        "Shift" => 16,
        "Control" => 17,
        "Alt" | "AltGraph" => 18,
        "Escape" => 27,
        " " => 32,
        "PageUp" => 33,
        "PageDown" => 34,
        "End" => 35,
        "Home" => 36,
        "ArrowLeft" | "Left" => 37,
        "ArrowUp" | "Up" => 38,
        "ArrowRight" | "Right" => 39,
        "ArrowDown" | "Down" => 40,
        "Insert" => 45,
        "Delete" => 46,
        "Meta" => 91,
        _ => {
            let mut chars = key.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                return None;
            };
            return c
                .to_uppercase()
                .next()
                .and_then(|upper| u8::try_from(u32::from(upper)).ok());
        }
    };
    Some(code)
}
