// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler-facing side of attitude control: message intake,
//! validity gating, and dispatch into the control laws and coil driver.

use crate::control::{lvlh_target_ecef, AttitudeController, BdotController};
use crate::math::{Quat, Vec3};
use cyphal::{ports, Transfer, TransportSet};
use drv_magnetorquer::{Coil, MagnetorquerDriver};
use dsdl::{sat, DataType};
use o1heap::Shared;
use ringlog::{log, Severity};
use sched::{Context, Inbox, Registrar, Task, Timing};

/// Detumbler: orientation solutions in, B-dot dipole out.
pub struct DetumbleTask<X, Y, Z> {
    timing: Timing,
    inbox: Inbox<1>,
    bdot: BdotController,
    driver: MagnetorquerDriver<X, Y, Z>,
}

impl<X: Coil, Y: Coil, Z: Coil> DetumbleTask<X, Y, Z> {
    pub fn new(
        interval_ms: u32,
        shift_ms: u32,
        bdot: BdotController,
        driver: MagnetorquerDriver<X, Y, Z>,
    ) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            inbox: Inbox::new(),
            bdot,
            driver,
        }
    }
}

impl<X: Coil, Y: Coil, Z: Coil, A: TransportSet> Task<A> for DetumbleTask<X, Y, Z> {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, _cx: &mut Context<'_, A>) {
        let Some(transfer) = self.inbox.pop() else {
            return;
        };
        let solution = match sat::OrientationSolution::deserialize(&transfer.payload) {
            Ok(s) => s,
            Err(e) => {
                log!(Severity::Error, "detumble: malformed orientation ({e:?})");
                return;
            }
        };
        if !solution.valid_magnetic_field {
            return;
        }
        let b_body = Vec3::from_array(solution.magnetic_field_body_t);
        if let Some(dipole) = self.bdot.update(b_body, solution.timestamp_us) {
            self.driver.apply(dipole.to_array());
        }
    }

    fn handle_message(&mut self, transfer: Shared<Transfer>) {
        self.inbox.push(transfer);
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.subscribe(ports::ORIENTATION_SOLUTION);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unsubscribe(ports::ORIENTATION_SOLUTION);
        self.inbox.clear();
    }
}

/// Nadir pointing: position solutions set the LVLH target, orientation
/// solutions close the PD loop onto the coils.
pub struct PointingTask<X, Y, Z> {
    timing: Timing,
    inbox: Inbox<2>,
    controller: AttitudeController,
    driver: MagnetorquerDriver<X, Y, Z>,
    q_desired: Option<Quat>,
}

impl<X: Coil, Y: Coil, Z: Coil> PointingTask<X, Y, Z> {
    pub fn new(
        interval_ms: u32,
        shift_ms: u32,
        controller: AttitudeController,
        driver: MagnetorquerDriver<X, Y, Z>,
    ) -> Self {
        Self {
            timing: Timing::new(interval_ms, shift_ms),
            inbox: Inbox::new(),
            controller,
            driver,
            q_desired: None,
        }
    }

    /// Whether a pointing target has been established yet.
    pub fn target_valid(&self) -> bool {
        self.q_desired.is_some()
    }

    fn ingest_position(&mut self, solution: &sat::PositionSolution) {
        if !solution.valid_position || !solution.valid_velocity {
            return;
        }
        let target = lvlh_target_ecef(
            Vec3::from_array(solution.position_ecef_m),
            Vec3::from_array(solution.velocity_ecef_mps),
        );
        match target {
            Some(q) => {
                self.q_desired = Some(q);
            }
            None => {
                log!(Severity::Warning, "pointing: degenerate state vector");
            }
        }
    }

    fn ingest_orientation(&mut self, solution: &sat::OrientationSolution) {
        let Some(q_desired) = self.q_desired else {
            // No target yet; pointing at nothing is not an improvement.
            return;
        };
        if !solution.valid_quaternion
            || !solution.valid_angular_velocity
            || !solution.valid_magnetic_field
        {
            return;
        }
        let dipole = self.controller.dipole(
            Quat::from_wxyz(solution.quaternion_wxyz),
            Vec3::from_array(solution.angular_velocity_radps),
            q_desired,
            Vec3::from_array(solution.magnetic_field_body_t),
        );
        self.driver.apply(dipole.to_array());
    }
}

impl<X: Coil, Y: Coil, Z: Coil, A: TransportSet> Task<A> for PointingTask<X, Y, Z> {
    fn timing(&mut self) -> &mut Timing {
        &mut self.timing
    }

    fn service(&mut self, _cx: &mut Context<'_, A>) {
        while let Some(transfer) = self.inbox.pop() {
            match transfer.metadata.port_id {
                p if p == ports::POSITION_SOLUTION => {
                    match sat::PositionSolution::deserialize(&transfer.payload) {
                        Ok(s) => self.ingest_position(&s),
                        Err(e) => {
                            log!(Severity::Error, "pointing: malformed position ({e:?})");
                        }
                    }
                }
                p if p == ports::ORIENTATION_SOLUTION => {
                    match sat::OrientationSolution::deserialize(&transfer.payload) {
                        Ok(s) => self.ingest_orientation(&s),
                        Err(e) => {
                            log!(Severity::Error, "pointing: malformed orientation ({e:?})");
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn handle_message(&mut self, transfer: Shared<Transfer>) {
        self.inbox.push(transfer);
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) {
        registrar.subscribe(ports::ORIENTATION_SOLUTION);
        registrar.subscribe(ports::POSITION_SOLUTION);
    }

    fn unregister(&mut self, registrar: &mut Registrar<'_>) {
        registrar.unsubscribe(ports::ORIENTATION_SOLUTION);
        registrar.unsubscribe(ports::POSITION_SOLUTION);
        self.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyphal::{Payload, TransferMetadata};
    use drv_magnetorquer::DriverConfig;
    use o1heap::Heap;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn test_heap() -> &'static Heap {
        let pool = Box::leak(vec![0u8; 65536].into_boxed_slice());
        Heap::init(pool).unwrap()
    }

    #[derive(Default, Clone, Copy)]
    struct CoilState {
        duty: u16,
        forward: bool,
        enabled: bool,
    }

    #[derive(Clone)]
    struct MockCoil(Rc<RefCell<CoilState>>);

    impl MockCoil {
        fn new() -> (Self, Rc<RefCell<CoilState>>) {
            let s = Rc::new(RefCell::new(CoilState::default()));
            (Self(s.clone()), s)
        }
    }

    impl Coil for MockCoil {
        fn energize(&mut self, duty: f32, forward: bool) {
            let mut s = self.0.borrow_mut();
            s.duty = (duty.clamp(0.0, 1.0) * 999.0) as u16;
            s.forward = forward;
            s.enabled = true;
        }
        fn release(&mut self) {
            let mut s = self.0.borrow_mut();
            s.duty = 0;
            s.enabled = false;
        }
    }

    fn mock_driver() -> (
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

    fn orientation_transfer(heap: &'static Heap, timestamp_us: u64) -> Shared<Transfer> {
        let sol = sat::OrientationSolution {
            timestamp_us,
            quaternion_wxyz: [0.707, 0.707, 0.0, 0.0],
            angular_velocity_radps: [0.01, 0.02, 0.03],
            magnetic_field_body_t: [1e-4, 2e-4, 3e-4],
            valid_quaternion: true,
            valid_angular_velocity: true,
            valid_magnetic_field: true,
        };
        solution_transfer(heap, ports::ORIENTATION_SOLUTION, &sol)
    }

    fn position_transfer(
        heap: &'static Heap,
        position: [f32; 3],
        velocity: [f32; 3],
    ) -> Shared<Transfer> {
        let sol = sat::PositionSolution {
            timestamp_us: 123,
            position_ecef_m: position,
            velocity_ecef_mps: velocity,
            acceleration_ecef_mps2: [0.0; 3],
            valid_position: true,
            valid_velocity: true,
            valid_acceleration: false,
        };
        solution_transfer(heap, ports::POSITION_SOLUTION, &sol)
    }

    fn solution_transfer<T: DataType>(
        heap: &'static Heap,
        port: cyphal::PortId,
        value: &T,
    ) -> Shared<Transfer> {
        let mut buf = [0u8; 128];
        let n = value.serialize(&mut buf).unwrap();
        Shared::new_in(
            heap,
            Transfer::new(
                TransferMetadata::message(port, 0),
                Payload::copy_from(heap, &buf[..n]).unwrap(),
            ),
        )
        .unwrap()
    }

    fn tick<T: Task<()>>(task: &mut T) {
        task.service(&mut Context {
            now_ms: 0,
            adapters: &mut (),
        });
    }

    #[test]
    fn pointing_drives_expected_signs() {
        let heap = test_heap();
        let (driver, states) = mock_driver();
        let mut task = PointingTask::new(100, 0, AttitudeController::new(0.5, 0.1), driver);

        // Establish the identity target: nadir +z, velocity +x.
        Task::<()>::handle_message(
            &mut task,
            position_transfer(heap, [0.0, 0.0, -6_371_000.0], [7660.0, 0.0, 0.0]),
        );
        Task::<()>::handle_message(&mut task, orientation_transfer(heap, 123));
        tick(&mut task);
        assert!(task.target_valid());

        let x = *states[0].borrow();
        let y = *states[1].borrow();
        let z = *states[2].borrow();
        // The reference case: x axis commands zero dipole, y reverse,
        // z forward; all coils enabled.
        assert_eq!(x.duty, 0);
        assert!(y.duty > 0);
        assert!(!y.forward);
        assert!(z.duty > 0);
        assert!(z.forward);
        assert!(x.enabled && y.enabled && z.enabled);
    }

    #[test]
    fn pointing_waits_for_a_target() {
        let heap = test_heap();
        let (driver, states) = mock_driver();
        let mut task = PointingTask::new(100, 0, AttitudeController::new(0.5, 0.1), driver);

        Task::<()>::handle_message(&mut task, orientation_transfer(heap, 123));
        tick(&mut task);
        assert!(!task.target_valid());
        assert!(!states[0].borrow().enabled);
        assert!(!states[1].borrow().enabled);
        assert!(!states[2].borrow().enabled);
    }

    #[test]
    fn detumble_commands_oppose_field_change() {
        let heap = test_heap();
        let (driver, states) = mock_driver();
        let mut task = DetumbleTask::new(100, 0, BdotController::new(1e4), driver);

        // First sample primes the derivative, second one drives.
        let mut first = sat::OrientationSolution {
            timestamp_us: 0,
            magnetic_field_body_t: [1e-5, 0.0, 0.0],
            valid_magnetic_field: true,
            ..sat::OrientationSolution::default()
        };
        Task::<()>::handle_message(
            &mut task,
            solution_transfer(heap, ports::ORIENTATION_SOLUTION, &first),
        );
        tick(&mut task);
        assert!(!states[0].borrow().enabled);

        first.timestamp_us = 1_000_000;
        first.magnetic_field_body_t = [2e-5, 0.0, 0.0];
        Task::<()>::handle_message(
            &mut task,
            solution_transfer(heap, ports::ORIENTATION_SOLUTION, &first),
        );
        tick(&mut task);
        let x = *states[0].borrow();
        assert!(x.enabled);
        assert!(x.duty > 0);
        assert!(!x.forward); // dipole opposes the growing field
    }

    #[test]
    fn detumble_skips_invalid_field() {
        let heap = test_heap();
        let (driver, states) = mock_driver();
        let mut task = DetumbleTask::new(100, 0, BdotController::new(1e4), driver);

        let sol = sat::OrientationSolution {
            timestamp_us: 5,
            magnetic_field_body_t: [1e-5, 0.0, 0.0],
            valid_magnetic_field: false,
            ..sat::OrientationSolution::default()
        };
        Task::<()>::handle_message(
            &mut task,
            solution_transfer(heap, ports::ORIENTATION_SOLUTION, &sol),
        );
        tick(&mut task);
        assert!(!states[0].borrow().enabled);
    }
}
