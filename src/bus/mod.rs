//! Two-wire bus transactions used by the EEPROM driver.
//!
//! A transaction always addresses one registered device and one linear
//! address inside it; the device address and the number of address bytes
//! are bound into the handle at registration time.
//!
//! Write transactions must not cross a device page boundary (the chip
//! would wrap around inside the page); read transactions may span any
//! number of pages.

mod linux;
mod memory;

use std::fmt;
use std::thread;
use std::time::{
	Duration,
	Instant,
};

use crate::eeprom::AddressWidth;

pub use self::linux::LinuxI2cBus;

pub use self::memory::{
	MemoryBus,
	Transaction,
	TransactionKind,
};

/// wait after each page write for the internal write cycle to finish
pub const WRITE_CYCLE_DELAY: Duration = Duration::from_millis(5);

/// generic failure status used by the buses in this crate for I/O errors
pub const FAULT_IO: u8 = 1;
/// device didn't acknowledge (not present or address not accepted)
pub const FAULT_NACK: u8 = 2;

pub fn reliable_sleep(mut duration: Duration) {
	loop {
		let now = Instant::now();
		thread::sleep(duration);
		let elapsed = now.elapsed();
		if elapsed >= duration {
			return;
		}
		duration -= elapsed;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Speed {
	/// 100 kHz
	Standard,
	/// 400 kHz
	Fast,
}

/// Opaque non-zero status byte reported by a bus, passed on verbatim.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BusFault(pub u8);

impl fmt::Display for BusFault {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "bus status {}", self.0)
	}
}

/// Called at most once with the status of a read (0 on success).
pub type ReadCompletion = Box<dyn FnOnce(u8) + Send>;

pub(crate) fn complete(completion: Option<ReadCompletion>, result: &Result<(), BusFault>) {
	if let Some(completion) = completion {
		completion(match result {
			Ok(()) => 0,
			Err(fault) => fault.0,
		});
	}
}

pub trait Bus {
	type Handle;

	fn register_device(&mut self, bus_address: u8, address_width: AddressWidth, speed: Speed) -> crate::AResult<Self::Handle>;

	// `data` must fit into a single page
	fn write(&mut self, handle: &Self::Handle, address: u32, data: &[u8], delay: Duration) -> Result<(), BusFault>;

	fn read(&mut self, handle: &Self::Handle, address: u32, data: &mut [u8], completion: Option<ReadCompletion>) -> Result<(), BusFault>;
}

impl<'a, B: ?Sized + Bus> Bus for &'a mut B {
	type Handle = B::Handle;

	fn register_device(&mut self, bus_address: u8, address_width: AddressWidth, speed: Speed) -> crate::AResult<Self::Handle> {
		B::register_device(*self, bus_address, address_width, speed)
	}

	fn write(&mut self, handle: &Self::Handle, address: u32, data: &[u8], delay: Duration) -> Result<(), BusFault> {
		B::write(*self, handle, address, data, delay)
	}

	fn read(&mut self, handle: &Self::Handle, address: u32, data: &mut [u8], completion: Option<ReadCompletion>) -> Result<(), BusFault> {
		B::read(*self, handle, address, data, completion)
	}
}
