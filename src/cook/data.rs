use crate::errors::CookError;
use crate::sdk::{FloatBufferData, TableData, TeResult, TeTime};

/// Id handed to the first accepted cook request.
pub const FIRST_FRAME_ID: u64 = 1;

/// A value written to an input link right before its frame starts.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Bool(bool),
    Doubles(Vec<f64>),
    Ints(Vec<i32>),
    String(String),
    Table(TableData),
    FloatBuffer(FloatBufferData),
}

/// A request to cook one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CookFrameRequest {
    /// Frame time in `time_scale` ticks. Only used with the external clock.
    pub frame_time: i64,
    /// Ticks per second.
    pub time_scale: i64,
    pub discontinuity: bool,
    /// Inputs to send with this frame, one entry per link.
    pub inputs: Vec<(String, InputValue)>,
}

impl CookFrameRequest {
    pub fn at(frame_time: i64, time_scale: i64) -> Self {
        Self { frame_time, time_scale, discontinuity: false, inputs: Vec::new() }
    }

    /// Adds an input, replacing an earlier value for the same link.
    pub fn with_input(mut self, identifier: impl Into<String>, value: InputValue) -> Self {
        self.set_input(identifier.into(), value);
        self
    }

    fn set_input(&mut self, identifier: String, value: InputValue) {
        match self.inputs.iter_mut().find(|(id, _)| *id == identifier) {
            Some((_, existing)) => *existing = value,
            None => self.inputs.push((identifier, value)),
        }
    }

    /// Takes over `older`'s inputs for links this request does not set.
    pub(crate) fn absorb_inputs(&mut self, older: &mut CookFrameRequest) {
        let newer = std::mem::take(&mut self.inputs);
        self.inputs = std::mem::take(&mut older.inputs);
        for (identifier, value) in newer {
            self.set_input(identifier, value);
        }
    }
}

/// Outcome of a cook. Never changes once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookFrameResult {
    /// `0` if the request was rejected before it got an id.
    pub frame_id: u64,
    pub result: Result<(), CookError>,
    /// Code the engine reported, `Success` when the engine was never involved.
    pub engine_result: TeResult,
    /// The engine skipped the frame and did not update any output.
    pub frame_dropped: bool,
    /// Last frame whose outputs are current.
    pub frame_last_updated: Option<u64>,
    pub start_time: TeTime,
    pub end_time: TeTime,
}

impl CookFrameResult {
    pub(crate) fn unstarted(frame_id: u64, error: CookError, frame_last_updated: Option<u64>) -> Self {
        Self {
            frame_id,
            result: Err(error),
            engine_result: TeResult::Success,
            frame_dropped: false,
            frame_last_updated,
            start_time: TeTime::default(),
            end_time: TeTime::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Delivered once a frame's cook result and all of its texture imports are in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedFrame {
    pub frame_id: u64,
    pub cook: CookFrameResult,
    /// Outputs imported for this frame, in completion order.
    pub imported: Vec<String>,
    /// Imports that failed or were cancelled.
    pub failed_imports: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_inputs_win_and_older_ones_are_kept() {
        let mut older = CookFrameRequest::at(0, 60)
            .with_input("op/a", InputValue::Bool(false))
            .with_input("op/b", InputValue::Ints(vec![1]));
        let mut newer = CookFrameRequest::at(5, 60)
            .with_input("op/b", InputValue::Ints(vec![2]))
            .with_input("op/c", InputValue::String("x".into()));

        newer.absorb_inputs(&mut older);

        assert_eq!(
            newer.inputs,
            vec![
                ("op/a".to_string(), InputValue::Bool(false)),
                ("op/b".to_string(), InputValue::Ints(vec![2])),
                ("op/c".to_string(), InputValue::String("x".into())),
            ]
        );
        assert_eq!(newer.frame_time, 5);
    }

    #[test]
    fn setting_a_link_twice_keeps_the_last_value() {
        let request = CookFrameRequest::at(0, 60)
            .with_input("op/a", InputValue::Doubles(vec![1.0]))
            .with_input("op/a", InputValue::Doubles(vec![2.0]));
        assert_eq!(request.inputs, vec![("op/a".to_string(), InputValue::Doubles(vec![2.0]))]);
    }
}
