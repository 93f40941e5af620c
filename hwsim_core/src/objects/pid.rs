//! PID controller for heater duty, with a clamped integrator and a
//! first-order derivative filter.
//!
//! The output is a duty request; callers clamp it to `0.0..=out_max`.
//! Zero `ki` disables the integrator, zero `kd` the derivative term.

use serde::{Deserialize, Serialize};

/// Integrator and derivative memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidState {
    integral: f64,
    prev_error: Option<f64>,
    derivative: f64,
}

impl PidState {
    /// Forget all history (target change, reset).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current integrator contribution.
    pub fn integral(&self) -> f64 {
        self.integral
    }
}

/// Controller gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain (duty per °C).
    pub kp: f64,
    /// Integral gain (duty per °C·s).
    pub ki: f64,
    /// Derivative gain (duty per °C/s).
    pub kd: f64,
    /// Derivative filter time constant [s] (0 = unfiltered).
    pub tf: f64,
    /// Output ceiling; the integrator never holds more than this.
    pub out_max: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 0.08,
            ki: 0.004,
            kd: 0.2,
            tf: 0.5,
            out_max: 1.0,
        }
    }
}

/// One controller step over `dt` seconds for `error = target - measured`.
pub fn pid_compute(state: &mut PidState, gains: &PidGains, error: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }

    let p_term = gains.kp * error;

    let i_term = if gains.ki != 0.0 {
        state.integral = (state.integral + gains.ki * error * dt).clamp(0.0, gains.out_max);
        state.integral
    } else {
        state.integral = 0.0;
        0.0
    };

    // No derivative kick on the first sample after a reset.
    let d_term = match state.prev_error {
        Some(prev) if gains.kd != 0.0 => {
            let raw = (error - prev) / dt;
            if gains.tf > 0.0 {
                let alpha = dt / (gains.tf + dt);
                state.derivative += alpha * (raw - state.derivative);
            } else {
                state.derivative = raw;
            }
            gains.kd * state.derivative
        }
        _ => 0.0,
    };
    state.prev_error = Some(error);

    p_term + i_term + d_term
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.1;

    fn p_only(kp: f64) -> PidGains {
        PidGains {
            kp,
            ki: 0.0,
            kd: 0.0,
            tf: 0.0,
            out_max: 1.0,
        }
    }

    #[test]
    fn proportional_only() {
        let mut state = PidState::default();
        let out = pid_compute(&mut state, &p_only(0.5), 2.0, DT);
        assert!((out - 1.0).abs() < 1e-12);
    }

    #[test]
    fn integrator_is_clamped_to_output_range() {
        let mut state = PidState::default();
        let gains = PidGains {
            kp: 0.0,
            ki: 10.0,
            kd: 0.0,
            tf: 0.0,
            out_max: 1.0,
        };
        for _ in 0..1_000 {
            pid_compute(&mut state, &gains, 100.0, DT);
        }
        assert_eq!(state.integral(), 1.0);
        for _ in 0..1_000 {
            pid_compute(&mut state, &gains, -100.0, DT);
        }
        assert_eq!(state.integral(), 0.0);
    }

    #[test]
    fn first_sample_has_no_derivative_kick() {
        let mut state = PidState::default();
        let gains = PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 1.0,
            tf: 0.0,
            out_max: 1.0,
        };
        assert_eq!(pid_compute(&mut state, &gains, 50.0, DT), 0.0);
        // (40 - 50) / 0.1 = -100
        let out = pid_compute(&mut state, &gains, 40.0, DT);
        assert!((out + 100.0).abs() < 1e-9);
    }

    #[test]
    fn reset_forgets_history() {
        let mut state = PidState::default();
        let gains = PidGains::default();
        for _ in 0..10 {
            pid_compute(&mut state, &gains, 5.0, DT);
        }
        assert!(state.integral() > 0.0);
        state.reset();
        assert_eq!(state.integral(), 0.0);
        assert!(state.prev_error.is_none());
    }

    #[test]
    fn zero_dt_is_inert() {
        let mut state = PidState::default();
        assert_eq!(pid_compute(&mut state, &p_only(3.0), 1.0, 0.0), 0.0);
    }
}
