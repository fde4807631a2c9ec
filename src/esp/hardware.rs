//! LED outputs and GPIO inputs.

use crate::config::{CommonCathodePins, StatusLedConfig};
use crate::error::{NodeError, Result};
use crate::led::LedDriver;
use crate::platform::{Level, PinReader, StatusPin};
use anyhow::Context;
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver, Pull};
use esp_idf_hal::ledc::config::TimerConfig;
use esp_idf_hal::ledc::{LedcChannel, LedcDriver, LedcTimer, LedcTimerDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::rmt::RmtChannel;
use esp_idf_hal::units::FromValueType;
use esp_idf_sys as sys;
use smart_leds::{SmartLedsWrite, RGB8};
use ws2812_esp32_rmt_driver::Ws2812Esp32Rmt;

/// Output pin from a GPIO number in the node configuration.
fn output_pin(gpio: u8) -> AnyOutputPin {
    // Pin numbers come from the board configuration and are not shared with
    // any other driver.
    unsafe { AnyOutputPin::new(gpio as i32) }
}

fn input_pin(gpio: u8) -> AnyIOPin {
    unsafe { AnyIOPin::new(gpio as i32) }
}

/// Single addressable WS2812 pixel driven by the RMT peripheral.
pub struct Ws2812Led {
    driver: Ws2812Esp32Rmt<'static>,
}

impl Ws2812Led {
    pub fn new<C>(channel: impl Peripheral<P = C> + 'static, gpio: u8) -> anyhow::Result<Self>
    where
        C: RmtChannel,
    {
        let driver = Ws2812Esp32Rmt::new(channel, output_pin(gpio))
            .with_context(|| format!("Failed to init WS2812 on GPIO {}", gpio))?;
        info!("esp::hardware: WS2812 on GPIO {}", gpio);
        Ok(Self { driver })
    }
}

impl LedDriver for Ws2812Led {
    fn write(&mut self, color: RGB8) -> Result<()> {
        self.driver.write([color].into_iter()).map_err(|e| {
            warn!("esp::hardware: WS2812 write failed: {:?}", e);
            NodeError::TransportFailure(sys::ESP_FAIL)
        })
    }
}

/// Common-cathode RGB LED on three LEDC channels sharing one timer.
pub struct CommonCathodeLed<T: LedcTimer + 'static> {
    red: LedcDriver<'static>,
    green: LedcDriver<'static>,
    blue: LedcDriver<'static>,
    _timer: LedcTimerDriver<'static, T>,
}

impl<T: LedcTimer + 'static> CommonCathodeLed<T> {
    pub fn new<R, G, B>(
        timer: impl Peripheral<P = T> + 'static,
        red: impl Peripheral<P = R> + 'static,
        green: impl Peripheral<P = G> + 'static,
        blue: impl Peripheral<P = B> + 'static,
        pins: &CommonCathodePins,
    ) -> anyhow::Result<Self>
    where
        R: LedcChannel<SpeedMode = T::SpeedMode>,
        G: LedcChannel<SpeedMode = T::SpeedMode>,
        B: LedcChannel<SpeedMode = T::SpeedMode>,
    {
        let timer = LedcTimerDriver::new(timer, &TimerConfig::default().frequency(5.kHz().into()))
            .context("Failed to init LEDC timer")?;
        let red = LedcDriver::new(red, &timer, output_pin(pins.red)).context("Failed to init red channel")?;
        let green =
            LedcDriver::new(green, &timer, output_pin(pins.green)).context("Failed to init green channel")?;
        let blue = LedcDriver::new(blue, &timer, output_pin(pins.blue)).context("Failed to init blue channel")?;
        info!(
            "esp::hardware: Common-cathode LED on GPIO {}/{}/{}",
            pins.red, pins.green, pins.blue
        );
        Ok(Self {
            red,
            green,
            blue,
            _timer: timer,
        })
    }
}

fn set_channel(channel: &mut LedcDriver<'static>, value: u8) -> Result<()> {
    let duty = channel.get_max_duty() * value as u32 / 255;
    channel.set_duty(duty)?;
    Ok(())
}

impl<T: LedcTimer + 'static> LedDriver for CommonCathodeLed<T> {
    fn write(&mut self, color: RGB8) -> Result<()> {
        set_channel(&mut self.red, color.r)?;
        set_channel(&mut self.green, color.g)?;
        set_channel(&mut self.blue, color.b)
    }
}

/// The force-root and force-leaf inputs, pulled up.
pub struct RolePins {
    force_root: PinDriver<'static, AnyIOPin, Input>,
    force_leaf: PinDriver<'static, AnyIOPin, Input>,
}

impl RolePins {
    pub fn new(force_root_gpio: u8, force_leaf_gpio: u8) -> anyhow::Result<Self> {
        let mut force_root = PinDriver::input(input_pin(force_root_gpio)).context("Failed to init force-root pin")?;
        force_root.set_pull(Pull::Up)?;
        let mut force_leaf = PinDriver::input(input_pin(force_leaf_gpio)).context("Failed to init force-leaf pin")?;
        force_leaf.set_pull(Pull::Up)?;
        Ok(Self { force_root, force_leaf })
    }
}

fn level(pin: &PinDriver<'static, AnyIOPin, Input>) -> Level {
    if pin.is_low() {
        Level::Low
    } else {
        Level::High
    }
}

impl PinReader for RolePins {
    fn sample(&mut self) -> Result<(Level, Level)> {
        Ok((level(&self.force_root), level(&self.force_leaf)))
    }
}

/// Plain GPIO driving the root status LED.
pub struct StatusLedPin {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    inverted: bool,
}

impl StatusLedPin {
    pub fn new(config: &StatusLedConfig) -> anyhow::Result<Self> {
        let pin = PinDriver::output(output_pin(config.gpio)).context("Failed to init status LED pin")?;
        let mut status = Self {
            pin,
            inverted: config.inverted,
        };
        status.set(false)?;
        Ok(status)
    }
}

impl StatusPin for StatusLedPin {
    fn set(&mut self, on: bool) -> Result<()> {
        if on != self.inverted {
            self.pin.set_high()?;
        } else {
            self.pin.set_low()?;
        }
        Ok(())
    }
}
