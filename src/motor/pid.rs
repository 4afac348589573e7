//! Velocity PID controller.
//!
//! Works on inputs and outputs scaled into a 0..1 span, with gains given as a
//! controller gain `Kc`, an integral time `Ti` and a derivative time `Td`:
//!
//! `co = bias + Kc * (e + (Ts / Ti) * Σe - (Td / Ts) * dPV)`
//!
//! The output is clamped to the configured limits and the integral only
//! accumulates while the output is not pegged against the limit the error is
//! pushing towards.

/// Operating mode. `Off` freezes the output; switching back to `Auto`
/// restarts from the bias with a cleared integral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PidMode {
    #[default]
    Off,
    Auto,
}

#[derive(Debug, Clone)]
pub struct Pid {
    kc: f32,
    /// Ts / Ti
    tau_r: f32,
    /// Td / Ts
    tau_d: f32,

    in_min: f32,
    in_span: f32,
    out_min: f32,
    out_span: f32,

    /// Feed-forward bias in output units, if set
    bias: Option<f32>,

    set_point: f32,
    process_value: f32,

    /// Sum of scaled errors
    acc_error: f32,
    /// Scaled process value from the previous compute
    prev_process_value: f32,
    /// Scaled output from the previous compute
    prev_output: f32,
    /// Last output in real units
    output: f32,

    mode: PidMode,
}

impl Pid {
    /// `interval` is the compute period in seconds.
    pub fn new(kc: f32, ti: f32, td: f32, interval: f32) -> Self {
        Self {
            kc,
            tau_r: if ti > 0.0 { interval / ti } else { 0.0 },
            tau_d: td / interval,
            in_min: 0.0,
            in_span: 1.0,
            out_min: 0.0,
            out_span: 1.0,
            bias: None,
            set_point: 0.0,
            process_value: 0.0,
            acc_error: 0.0,
            prev_process_value: 0.0,
            prev_output: 0.0,
            output: 0.0,
            mode: PidMode::Off,
        }
    }

    pub fn with_input_limits(mut self, min: f32, max: f32) -> Self {
        self.in_min = min;
        self.in_span = max - min;
        self
    }

    pub fn with_output_limits(mut self, min: f32, max: f32) -> Self {
        self.out_min = min;
        self.out_span = max - min;
        self
    }

    pub fn with_bias(mut self, bias: f32) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn set_mode(&mut self, mode: PidMode) {
        if mode == PidMode::Auto && self.mode == PidMode::Off {
            self.reset();
        }
        self.mode = mode;
    }

    pub fn set_set_point(&mut self, set_point: f32) {
        self.set_point = set_point;
    }

    pub fn set_point(&self) -> f32 {
        self.set_point
    }

    pub fn set_process_value(&mut self, value: f32) {
        self.process_value = value;
    }

    /// Accumulated (scaled) error
    pub fn integral(&self) -> f32 {
        self.acc_error
    }

    pub fn last_output(&self) -> f32 {
        self.output
    }

    /// Clear the integral and restart from the bias (or the last output when
    /// no bias is configured).
    pub fn reset(&mut self) {
        let start = self.bias.unwrap_or(self.output);
        self.prev_output = self.scale_out(start);
        self.prev_process_value = self.scale_in(self.process_value);
        self.acc_error = 0.0;
    }

    /// Run one step. Returns the new output, always within the output limits.
    pub fn compute(&mut self) -> f32 {
        if self.mode == PidMode::Off {
            return self.output;
        }

        let pv = self.scale_in(self.process_value);
        let sp = self.scale_in(self.set_point);
        let error = sp - pv;

        // anti-windup: hold the integral while pegged in the error's direction
        let pegged_high = self.prev_output >= 1.0 && error > 0.0;
        let pegged_low = self.prev_output <= 0.0 && error < 0.0;
        if !pegged_high && !pegged_low {
            self.acc_error += error;
        }

        let slope = pv - self.prev_process_value;
        let bias = self.bias.map_or(0.0, |b| self.scale_out(b));

        let co = (bias + self.kc * (error + self.tau_r * self.acc_error - self.tau_d * slope))
            .clamp(0.0, 1.0);

        self.prev_output = co;
        self.prev_process_value = pv;
        self.output = co * self.out_span + self.out_min;
        self.output
    }

    fn scale_in(&self, value: f32) -> f32 {
        ((value - self.in_min) / self.in_span).clamp(0.0, 1.0)
    }

    fn scale_out(&self, value: f32) -> f32 {
        (value - self.out_min) / self.out_span
    }
}
