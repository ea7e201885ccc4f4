// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Magnetorquer coil driver.
//!
//! Translates a commanded dipole vector into per-axis hardware state: an
//! H-bridge polarity pin, an active-low enable, and a PWM duty cycle. Sign
//! selects polarity, magnitude scales duty against the configured
//! saturation dipole, and anything beyond saturation clamps -- a coil can
//! only do what a coil can do.
//!
//! The hardware lines hide behind [`Coil`], with [`PwmCoil`] bridging to
//! `embedded-hal` PWM and GPIO pins. The control tasks talk dipoles and
//! never see a pin.

#![cfg_attr(not(test), no_std)]

use embedded_hal::digital::v2::OutputPin;
use embedded_hal::PwmPin;
use libm::fabsf;

/// One coil axis: drive at a duty with a direction, or release entirely.
pub trait Coil {
    /// Energizes the coil. `duty` is the fraction of full drive in
    /// [0, 1]; `forward` picks the H-bridge direction.
    fn energize(&mut self, duty: f32, forward: bool);

    /// De-energizes the coil and deasserts the (active-low) enable.
    fn release(&mut self);
}

/// `embedded-hal`-backed coil: PWM channel, polarity pin, active-low
/// enable pin.
pub struct PwmCoil<P, E, D> {
    pwm: P,
    enable: E,
    polarity: D,
}

impl<P, E, D> PwmCoil<P, E, D>
where
    P: PwmPin<Duty = u16>,
    E: OutputPin,
    D: OutputPin,
{
    pub fn new(pwm: P, enable: E, polarity: D) -> Self {
        Self {
            pwm,
            enable,
            polarity,
        }
    }
}

impl<P, E, D> Coil for PwmCoil<P, E, D>
where
    P: PwmPin<Duty = u16>,
    E: OutputPin,
    D: OutputPin,
{
    fn energize(&mut self, duty: f32, forward: bool) {
        let max = self.pwm.get_max_duty();
        let compare = (duty.clamp(0.0, 1.0) * max as f32) as u16;
        if forward {
            let _ = self.polarity.set_high();
        } else {
            let _ = self.polarity.set_low();
        }
        self.pwm.set_duty(compare.min(max));
        self.pwm.enable();
        // Enable is active low.
        let _ = self.enable.set_low();
    }

    fn release(&mut self) {
        self.pwm.set_duty(0);
        self.pwm.disable();
        let _ = self.enable.set_high();
    }
}

/// Per-axis saturation dipole, A·m².
#[derive(Copy, Clone, Debug)]
pub struct DriverConfig {
    pub max_dipole: [f32; 3],
}

/// Three-axis driver. Owns the coils; consumes dipole vectors.
pub struct MagnetorquerDriver<X, Y, Z> {
    config: DriverConfig,
    x: X,
    y: Y,
    z: Z,
}

impl<X: Coil, Y: Coil, Z: Coil> MagnetorquerDriver<X, Y, Z> {
    pub fn new(config: DriverConfig, x: X, y: Y, z: Z) -> Self {
        Self { config, x, y, z }
    }

    /// Applies a dipole command, clamping each axis to its saturation
    /// value. Returns the dipole actually driven.
    pub fn apply(&mut self, dipole: [f32; 3]) -> [f32; 3] {
        let mut driven = [0.0f32; 3];
        for axis in 0..3 {
            let max = self.config.max_dipole[axis];
            driven[axis] = dipole[axis].clamp(-max, max);
        }
        let cfg = self.config;
        Self::drive(&mut self.x, driven[0], cfg.max_dipole[0]);
        Self::drive(&mut self.y, driven[1], cfg.max_dipole[1]);
        Self::drive(&mut self.z, driven[2], cfg.max_dipole[2]);
        driven
    }

    /// Releases all three coils.
    pub fn stop(&mut self) {
        self.x.release();
        self.y.release();
        self.z.release();
    }

    fn drive<C: Coil>(coil: &mut C, dipole: f32, max: f32) {
        let duty = if max > 0.0 { fabsf(dipole) / max } else { 0.0 };
        coil.energize(duty, dipole > 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default, Clone, Copy, Debug, PartialEq)]
    struct CoilState {
        duty: u16,
        pwm_enabled: bool,
        enable_high: bool,
        polarity_high: bool,
    }

    #[derive(Clone)]
    struct MockCoil(Rc<RefCell<CoilState>>);

    impl MockCoil {
        fn new() -> (Self, Rc<RefCell<CoilState>>) {
            let state = Rc::new(RefCell::new(CoilState {
                enable_high: true,
                ..CoilState::default()
            }));
            (Self(state.clone()), state)
        }
    }

    impl Coil for MockCoil {
        fn energize(&mut self, duty: f32, forward: bool) {
            let mut s = self.0.borrow_mut();
            s.duty = (duty.clamp(0.0, 1.0) * 999.0) as u16;
            s.pwm_enabled = true;
            s.enable_high = false;
            s.polarity_high = forward;
        }

        fn release(&mut self) {
            let mut s = self.0.borrow_mut();
            s.duty = 0;
            s.pwm_enabled = false;
            s.enable_high = true;
        }
    }

    fn driver() -> (
        MagnetorquerDriver<MockCoil, MockCoil, MockCoil>,
        [Rc<RefCell<CoilState>>; 3],
    ) {
        let (x, xs) = MockCoil::new();
        let (y, ys) = MockCoil::new();
        let (z, zs) = MockCoil::new();
        (
            MagnetorquerDriver::new(
                DriverConfig {
                    max_dipole: [0.5, 0.5, 0.5],
                },
                x,
                y,
                z,
            ),
            [xs, ys, zs],
        )
    }

    #[test]
    fn signs_set_polarity_and_enables_go_low() {
        let (mut drv, states) = driver();
        drv.apply([0.0, -0.4, 0.25]);

        let x = *states[0].borrow();
        let y = *states[1].borrow();
        let z = *states[2].borrow();

        // Zero command: no duty, reverse polarity state, still enabled.
        assert_eq!(x.duty, 0);
        assert!(!x.polarity_high);
        assert!(!x.enable_high);

        // Negative command: reverse polarity, proportional duty.
        assert!(y.duty > 0);
        assert!(!y.polarity_high);
        assert!(!y.enable_high);
        assert_eq!(y.duty, (0.4 / 0.5 * 999.0) as u16);

        // Positive command: forward polarity.
        assert!(z.duty > 0);
        assert!(z.polarity_high);
        assert!(!z.enable_high);
    }

    #[test]
    fn saturation_clamps_per_axis() {
        let (mut drv, states) = driver();
        let driven = drv.apply([12.0, -7.0, 0.1]);
        assert_eq!(driven, [0.5, -0.5, 0.1]);
        assert_eq!(states[0].borrow().duty, 999);
        assert_eq!(states[1].borrow().duty, 999);
        assert!(states[2].borrow().duty < 999);
    }

    #[test]
    fn stop_releases_everything() {
        let (mut drv, states) = driver();
        drv.apply([0.1, 0.1, 0.1]);
        drv.stop();
        for s in &states {
            let s = *s.borrow();
            assert_eq!(s.duty, 0);
            assert!(!s.pwm_enabled);
            assert!(s.enable_high);
        }
    }

    // Exercise the embedded-hal bridge with minimal pin fakes.
    mod hal {
        use super::*;

        #[derive(Default)]
        struct FakePwm {
            duty: u16,
            enabled: bool,
        }
        impl PwmPin for FakePwm {
            type Duty = u16;
            fn disable(&mut self) {
                self.enabled = false;
            }
            fn enable(&mut self) {
                self.enabled = true;
            }
            fn get_duty(&self) -> u16 {
                self.duty
            }
            fn get_max_duty(&self) -> u16 {
                999
            }
            fn set_duty(&mut self, duty: u16) {
                self.duty = duty;
            }
        }

        #[derive(Default)]
        struct FakePin {
            high: bool,
        }
        impl OutputPin for FakePin {
            type Error = core::convert::Infallible;
            fn set_low(&mut self) -> Result<(), Self::Error> {
                self.high = false;
                Ok(())
            }
            fn set_high(&mut self) -> Result<(), Self::Error> {
                self.high = true;
                Ok(())
            }
        }

        #[test]
        fn pwm_coil_drives_the_pins() {
            let mut coil =
                PwmCoil::new(FakePwm::default(), FakePin { high: true }, FakePin::default());
            coil.energize(0.5, true);
            assert_eq!(coil.pwm.duty, 499);
            assert!(coil.pwm.enabled);
            assert!(!coil.enable.high); // active low
            assert!(coil.polarity.high);

            coil.energize(1.5, false); // over-range clamps
            assert_eq!(coil.pwm.duty, 999);
            assert!(!coil.polarity.high);

            coil.release();
            assert_eq!(coil.pwm.duty, 0);
            assert!(!coil.pwm.enabled);
            assert!(coil.enable.high);
        }
    }
}
