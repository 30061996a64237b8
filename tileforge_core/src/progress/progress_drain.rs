use super::ProgressTrait;

/// A progress indicator that swallows everything. Used in tests.
pub struct ProgressDrain {}

impl ProgressTrait for ProgressDrain {
	fn new() -> Self {
		ProgressDrain {}
	}

	fn init(&mut self, _message: &str, _max_value: u64) {}

	fn set_position(&mut self, _value: u64) {}

	fn inc(&mut self, _delta: u64) {}

	fn finish(&mut self) {}
}
