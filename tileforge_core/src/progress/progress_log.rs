use super::ProgressTrait;

/// A progress indicator that emits a log line whenever the position crosses
/// the next 10% of the total (or every 10000 steps for unbounded tasks).
pub struct ProgressLog {
	message: String,
	max_value: u64,
	position: u64,
	next_report: u64,
}

impl ProgressLog {
	fn step(&self) -> u64 {
		if self.max_value == 0 {
			10_000
		} else {
			(self.max_value / 10).max(1)
		}
	}

	fn report(&mut self) {
		if self.position < self.next_report {
			return;
		}
		self.next_report = self.position + self.step();
		if self.max_value > 0 {
			log::info!(
				"{}: {}/{} ({}%)",
				self.message,
				self.position,
				self.max_value,
				self.position * 100 / self.max_value
			);
		} else {
			log::info!("{}: {}", self.message, self.position);
		}
	}
}

impl ProgressTrait for ProgressLog {
	fn new() -> Self {
		ProgressLog {
			message: String::new(),
			max_value: 0,
			position: 0,
			next_report: 0,
		}
	}

	fn init(&mut self, message: &str, max_value: u64) {
		self.message = message.to_string();
		self.max_value = max_value;
		self.position = 0;
		self.next_report = self.step();
		log::info!("{}: starting ({} steps)", self.message, self.max_value);
	}

	fn set_position(&mut self, value: u64) {
		self.position = value;
		self.report();
	}

	fn inc(&mut self, delta: u64) {
		self.position += delta;
		self.report();
	}

	fn finish(&mut self) {
		self.position = self.max_value.max(self.position);
		log::info!("{}: finished ({} steps)", self.message, self.position);
	}
}
