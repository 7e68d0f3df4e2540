use std::fmt;
use std::str;

use crate::bus::{
	Bus,
	Speed,
};

use super::Eeprom;

/// Base I²C address of the 24Cxx family; the A0-A2 pins add an offset.
const BASE_BUS_ADDRESS: u8 = 0x50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressWidth {
	One,
	Two,
	Three,
	Four,
}

impl AddressWidth {
	/// least number of address bytes needed to address `memory_size` bytes
	pub fn for_memory_size(memory_size: u32) -> Self {
		if 0 != memory_size & 0xff00_0000 {
			AddressWidth::Four
		} else if 0 != memory_size & 0x00ff_0000 {
			AddressWidth::Three
		} else if 0 != memory_size & 0x0000_ff00 {
			AddressWidth::Two
		} else {
			AddressWidth::One
		}
	}

	pub fn bytes(&self) -> usize {
		match self {
			AddressWidth::One => 1,
			AddressWidth::Two => 2,
			AddressWidth::Three => 3,
			AddressWidth::Four => 4,
		}
	}

	/// whether `address` can be sent with this many address bytes
	pub fn can_address(&self, address: u32) -> bool {
		match self {
			AddressWidth::Four => true,
			_ => address < (1u32 << (8 * self.bytes())),
		}
	}

	/// big-endian address bytes as sent on the wire
	pub fn encode(&self, address: u32) -> Vec<u8> {
		let bytes = address.to_be_bytes();
		bytes[4 - self.bytes()..].to_vec()
	}
}

/// Device address selected by the address pins (A2 A1 A0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceAddress {
	A0,
	A1,
	A2,
	A3,
	A4,
	A5,
	A6,
	A7,
}

impl DeviceAddress {
	pub const ALL: [DeviceAddress; 8] = [
		DeviceAddress::A0, DeviceAddress::A1, DeviceAddress::A2, DeviceAddress::A3,
		DeviceAddress::A4, DeviceAddress::A5, DeviceAddress::A6, DeviceAddress::A7,
	];

	fn pins(&self) -> u8 {
		match self {
			DeviceAddress::A0 => 0,
			DeviceAddress::A1 => 1,
			DeviceAddress::A2 => 2,
			DeviceAddress::A3 => 3,
			DeviceAddress::A4 => 4,
			DeviceAddress::A5 => 5,
			DeviceAddress::A6 => 6,
			DeviceAddress::A7 => 7,
		}
	}

	/// 7-bit address on the bus
	pub fn bus_address(&self) -> u8 {
		BASE_BUS_ADDRESS + self.pins()
	}

	pub fn from_bus_address(address: u8) -> Option<Self> {
		DeviceAddress::ALL.iter().cloned().find(|a| a.bus_address() == address)
	}
}

impl fmt::Display for DeviceAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "A{} (0x{:02x})", self.pins(), self.bus_address())
	}
}

impl str::FromStr for DeviceAddress {
	type Err = ::failure::Error;

	// "A3", "a3" or the raw bus address "0x53"
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.len() == 2 && (s.starts_with('A') || s.starts_with('a')) {
			let pins = with_context!(("invalid device address pins: {:?}", s),
				Ok(u8::from_str_radix(&s[1..], 8)?)
			)?;
			return Ok(DeviceAddress::ALL[pins as usize]);
		}

		ensure!(s.starts_with("0x"), "device address must be A0..A7 or 0x50..0x57: {:?}", s);
		let raw = with_context!(("invalid device address: {:?}", s),
			Ok(u8::from_str_radix(&s[2..], 16)?)
		)?;
		match DeviceAddress::from_bus_address(raw) {
			Some(a) => Ok(a),
			None => bail!("device address 0x{:02x} not in range 0x50..0x57", raw),
		}
	}
}

/// Size and addressing of an EEPROM; fixed once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
	device_address: DeviceAddress,
	page_size: u32,
	memory_size: u32,
	address_width: AddressWidth,
}

impl Geometry {
	pub fn new(device_address: DeviceAddress, page_size: u32, page_count: u32) -> crate::AResult<Self> {
		ensure!(page_size > 0, "page size must not be zero");
		ensure!(page_count > 0, "page count must not be zero");
		let memory_size = match page_size.checked_mul(page_count) {
			Some(size) => size,
			None => bail!("memory size of {} pages with {} bytes each doesn't fit 32-bit addresses", page_count, page_size),
		};

		Ok(Geometry {
			device_address,
			page_size,
			memory_size,
			address_width: AddressWidth::for_memory_size(memory_size),
		})
	}

	pub fn device_address(&self) -> DeviceAddress {
		self.device_address
	}

	pub fn page_size(&self) -> u32 {
		self.page_size
	}

	pub fn page_count(&self) -> u32 {
		self.memory_size / self.page_size
	}

	pub fn memory_size(&self) -> u32 {
		self.memory_size
	}

	pub fn address_width(&self) -> AddressWidth {
		self.address_width
	}

	/// Whether `[address, address + byte_count)` may be accessed.
	///
	/// Rejects ranges ending exactly at `memory_size`, so the last byte of
	/// the device is only reachable by ranges that stop short of it.
	pub fn is_in_range(&self, address: u32, byte_count: u32) -> bool {
		// first condition prevents the sum from wrapping
		address < (u32::max_value() - byte_count)
			&& (address + byte_count) < self.memory_size
	}

	/// Registers the device on `bus` and returns the driver using it.
	pub fn initialize<B: Bus>(self, mut bus: B) -> crate::AResult<Eeprom<B>> {
		let handle = with_context!(("couldn't register EEPROM {}", self.device_address), {
			bus.register_device(self.device_address.bus_address(), self.address_width, Speed::Fast)
		})?;
		debug!("EEPROM {}: registered, {} pages of {} bytes, {} address bytes",
			self.device_address, self.page_count(), self.page_size, self.address_width.bytes());

		Ok(Eeprom::from_parts(self, bus, handle))
	}
}

impl fmt::Display for Geometry {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f,
			"EEPROM {}: {} bytes ({} pages x {} bytes), {}-byte addresses",
			self.device_address,
			self.memory_size,
			self.page_count(),
			self.page_size,
			self.address_width.bytes(),
		)
	}
}
