//! LED output abstraction.
//!
//! `Led` is a cloneable handle over one or more physical outputs (the WS2812
//! strip and the optional common-cathode LED). Every write goes to all of them.

use crate::error::{NodeError, Result};
use rgb::RGB8;
use std::sync::{Arc, Mutex, PoisonError};

/// A physical RGB output.
pub trait LedDriver: Send {
    fn write(&mut self, color: RGB8) -> Result<()>;
}

/// Preset colours addressed by the `0xF0..=0xFF` solid colour commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedColor {
    Off,
    Orange,
    White,
    Warning,
    Init,
    Pink,
    Yellow,
    Blue,
    Green,
    Red,
}

impl NamedColor {
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0xF0 => NamedColor::Off,
            0xF7 => NamedColor::Orange,
            0xF8 => NamedColor::White,
            0xF9 => NamedColor::Warning,
            0xFA => NamedColor::Init,
            0xFB => NamedColor::Pink,
            0xFC => NamedColor::Yellow,
            0xFD => NamedColor::Blue,
            0xFE => NamedColor::Green,
            0xFF => NamedColor::Red,
            _ => return Err(NodeError::NotFound),
        })
    }

    pub fn code(self) -> u8 {
        match self {
            NamedColor::Off => 0xF0,
            NamedColor::Orange => 0xF7,
            NamedColor::White => 0xF8,
            NamedColor::Warning => 0xF9,
            NamedColor::Init => 0xFA,
            NamedColor::Pink => 0xFB,
            NamedColor::Yellow => 0xFC,
            NamedColor::Blue => 0xFD,
            NamedColor::Green => 0xFE,
            NamedColor::Red => 0xFF,
        }
    }

    pub fn rgb(self) -> RGB8 {
        match self {
            NamedColor::Off => RGB8::new(0, 0, 0),
            NamedColor::Orange => RGB8::new(255, 165, 0),
            NamedColor::White => RGB8::new(255, 255, 255),
            NamedColor::Warning => RGB8::new(155, 155, 155),
            NamedColor::Init => RGB8::new(0, 155, 155),
            NamedColor::Pink => RGB8::new(155, 0, 155),
            NamedColor::Yellow => RGB8::new(155, 155, 0),
            NamedColor::Blue => RGB8::new(0, 0, 155),
            NamedColor::Green => RGB8::new(0, 155, 0),
            NamedColor::Red => RGB8::new(155, 0, 0),
        }
    }
}

struct LedInner {
    outputs: Vec<Box<dyn LedDriver>>,
}

#[derive(Clone)]
pub struct Led {
    inner: Arc<Mutex<LedInner>>,
}

impl Led {
    pub fn new(primary: Box<dyn LedDriver>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LedInner {
                outputs: vec![primary],
            })),
        }
    }

    /// Mirror every subsequent write onto another output.
    pub fn add_output(&self, output: Box<dyn LedDriver>) {
        self.lock().outputs.push(output);
    }

    pub fn set_rgb(&self, color: RGB8) -> Result<()> {
        let mut inner = self.lock();
        let mut result = Ok(());
        for output in inner.outputs.iter_mut() {
            if let Err(e) = output.write(color) {
                warn!("led: Output write failed: {}", e);
                result = Err(e);
            }
        }
        result
    }

    pub fn set_named(&self, color: NamedColor) -> Result<()> {
        debug!("led: Preset {:?}", color);
        self.set_rgb(color.rgb())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
