use crate::bus::BusFault;

pub const STATUS_OK: u8 = 0;
pub const STATUS_OUT_OF_BOUNDS: u8 = 255;

/// Failure of a single EEPROM operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Fail)]
pub enum EepromError {
	/// Requested range exceeds the device; nothing was sent on the bus.
	#[fail(display = "address range out of bounds")]
	OutOfBounds,

	/// The bus reported `status`; the first `written` bytes of the request
	/// already reached the device.
	#[fail(display = "bus transaction failed with status {} after {} bytes", status, written)]
	Bus {
		status: u8,
		written: u32,
	},
}

impl EepromError {
	pub(super) fn bus(fault: BusFault, written: u32) -> Self {
		EepromError::Bus {
			status: fault.0,
			written,
		}
	}

	/// Status byte: 255 for out of bounds, the bus code otherwise.
	pub fn status(&self) -> u8 {
		match *self {
			EepromError::OutOfBounds => STATUS_OUT_OF_BOUNDS,
			EepromError::Bus { status, .. } => status,
		}
	}
}

pub type Status = Result<(), EepromError>;

/// Collapses an operation result into its status byte (0 on success).
pub fn status_code(status: &Status) -> u8 {
	match status {
		Ok(()) => STATUS_OK,
		Err(e) => e.status(),
	}
}
