mod geometry;
mod status;

pub use self::geometry::{
	AddressWidth,
	DeviceAddress,
	Geometry,
};

pub use self::status::{
	EepromError,
	STATUS_OK,
	STATUS_OUT_OF_BOUNDS,
	Status,
	status_code,
};

use crate::bus::{
	Bus,
	ReadCompletion,
	WRITE_CYCLE_DELAY,
};

/// Registered EEPROM; splits writes so no bus transaction crosses a page.
pub struct Eeprom<B: Bus> {
	geometry: Geometry,
	bus: B,
	handle: B::Handle,
}

impl<B: Bus> Eeprom<B> {
	fn from_parts(geometry: Geometry, bus: B, handle: B::Handle) -> Self {
		Eeprom {
			geometry,
			bus,
			handle,
		}
	}

	pub fn geometry(&self) -> &Geometry {
		&self.geometry
	}

	pub fn bus(&self) -> &B {
		&self.bus
	}

	pub fn bus_mut(&mut self) -> &mut B {
		&mut self.bus
	}

	pub fn into_bus(self) -> B {
		self.bus
	}

	fn check_range(&self, address: u32, byte_count: usize) -> Result<u32, EepromError> {
		if byte_count > u32::max_value() as usize {
			return Err(EepromError::OutOfBounds);
		}
		let byte_count = byte_count as u32;
		if !self.geometry.is_in_range(address, byte_count) {
			trace!("EEPROM {}: rejecting {} bytes at 0x{:x}", self.geometry.device_address(), byte_count, address);
			return Err(EepromError::OutOfBounds);
		}
		Ok(byte_count)
	}

	/// Writes `data` starting at `address`, one transaction per touched page.
	///
	/// On a bus failure the bytes before `written` have already been stored.
	pub fn write(&mut self, address: u32, data: &[u8]) -> Status {
		let byte_count = self.check_range(address, data.len())?;
		let page_size = self.geometry.page_size();

		let mut bytes_remaining = byte_count;
		while bytes_remaining > 0 {
			let offset = byte_count - bytes_remaining;
			let position = address + offset;

			// distance to next page boundary, clamped for the last chunk
			let bytes = (page_size - position % page_size).min(bytes_remaining);

			let chunk = &data[offset as usize..(offset + bytes) as usize];
			trace!("EEPROM {}: write {} bytes at 0x{:x}", self.geometry.device_address(), bytes, position);
			if let Err(fault) = self.bus.write(&self.handle, position, chunk, WRITE_CYCLE_DELAY) {
				warn!("EEPROM {}: write at 0x{:x} failed with {}", self.geometry.device_address(), position, fault);
				return Err(EepromError::bus(fault, offset));
			}

			bytes_remaining -= bytes;
		}

		Ok(())
	}

	/// Overwrites `byte_count` bytes starting at `address` with zeroes.
	pub fn erase(&mut self, address: u32, byte_count: u32) -> Status {
		let byte_count = self.check_range(address, byte_count as usize)?;
		let page_size = self.geometry.page_size();
		let zeroes = vec![0u8; page_size as usize];

		let mut bytes_remaining = byte_count;
		while bytes_remaining > 0 {
			let offset = byte_count - bytes_remaining;
			let bytes = bytes_remaining.min(page_size);

			match self.write(address + offset, &zeroes[..bytes as usize]) {
				Ok(()) => (),
				Err(EepromError::Bus { status, written }) => {
					return Err(EepromError::Bus { status, written: offset + written });
				},
				Err(e) => return Err(e),
			}

			bytes_remaining -= bytes;
		}

		Ok(())
	}

	/// Reads `data.len()` bytes starting at `address` in a single transaction.
	///
	/// `completion` is handed to the bus, which calls it with the status
	/// once the transfer finished; it is dropped unused if the range is
	/// rejected.
	pub fn read(&mut self, address: u32, data: &mut [u8], completion: Option<ReadCompletion>) -> Status {
		self.check_range(address, data.len())?;
		trace!("EEPROM {}: read {} bytes at 0x{:x}", self.geometry.device_address(), data.len(), address);

		self.bus.read(&self.handle, address, data, completion).map_err(|fault| {
			warn!("EEPROM {}: read at 0x{:x} failed with {}", self.geometry.device_address(), address, fault);
			EepromError::bus(fault, 0)
		})
	}

	/// Reads `byte_count` bytes into a new buffer; the range is checked
	/// before anything is allocated.
	pub fn read_vec(&mut self, address: u32, byte_count: u32) -> Result<Vec<u8>, EepromError> {
		self.check_range(address, byte_count as usize)?;
		let mut data = vec![0u8; byte_count as usize];
		self.read(address, &mut data, None)?;
		Ok(data)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{
		AtomicUsize,
		Ordering,
	};

	use crate::bus::{
		MemoryBus,
		Speed,
		TransactionKind,
	};

	use super::*;

	fn open(bus: &mut MemoryBus, page_size: u32, page_count: u32) -> Eeprom<&mut MemoryBus> {
		bus.attach(0x50, (page_size * page_count) as usize, page_size as usize);
		Geometry::new(DeviceAddress::A0, page_size, page_count).unwrap().initialize(bus).unwrap()
	}

	fn pattern(len: usize) -> Vec<u8> {
		(0..len).map(|i| (i * 7 + 3) as u8).collect()
	}

	#[test]
	fn initialize_registers_fast_mode() {
		let mut bus = MemoryBus::new();
		open(&mut bus, 64, 4);
		assert_eq!(bus.speed(0x50), Some(Speed::Fast));
	}

	#[test]
	fn initialize_fails_without_device() {
		let mut bus = MemoryBus::new();
		let geometry = Geometry::new(DeviceAddress::A3, 64, 4).unwrap();
		assert!(geometry.initialize(&mut bus).is_err());
	}

	#[test]
	fn write_splits_at_page_boundary() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 64, 4);
		assert_eq!(ee.write(60, &pattern(10)), Ok(()));

		let tx: Vec<(u32, usize)> = ee.bus().transactions().iter().map(|t| (t.address, t.len)).collect();
		assert_eq!(tx, vec![(60, 4), (64, 6)]);
		assert!(ee.bus().transactions().iter().all(|t| t.delay == WRITE_CYCLE_DELAY));
	}

	#[test]
	fn write_transactions_cover_range_within_pages() {
		for &(page_size, address, len) in &[(16u32, 0u32, 16usize), (16, 5, 40), (32, 31, 2), (8, 3, 100), (64, 0, 200)] {
			let mut bus = MemoryBus::new();
			let mut ee = open(&mut bus, page_size, 16);
			assert_eq!(ee.write(address, &pattern(len)), Ok(()));

			let mut expected_start = address;
			for t in ee.bus().transactions() {
				assert_eq!(t.kind, TransactionKind::Write);
				assert_eq!(t.address, expected_start);
				assert!(t.len > 0);
				assert!(t.address % page_size + t.len as u32 <= page_size, "{:?} crosses a page", t);
				expected_start = t.end();
			}
			assert_eq!(expected_start, address + len as u32);
		}
	}

	#[test]
	fn write_then_read_round_trip() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 16, 32);
		let data = pattern(77);
		assert_eq!(ee.write(13, &data), Ok(()));

		let mut buf = vec![0u8; data.len()];
		assert_eq!(ee.read(13, &mut buf, None), Ok(()));
		assert_eq!(buf, data);
		// reads are never split
		let reads: Vec<_> = ee.bus().transactions().iter().filter(|t| t.kind == TransactionKind::Read).collect();
		assert_eq!(reads.len(), 1);
		assert_eq!(reads[0].len, 77);
	}

	#[test]
	fn erase_then_read_zeroes() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 16, 32);
		assert_eq!(ee.write(0, &pattern(200)), Ok(()));
		ee.bus_mut().clear_transactions();
		assert_eq!(ee.erase(21, 50), Ok(()));
		assert!(ee.bus().transactions().iter().all(|t| t.address >= 21 && t.end() <= 71));

		let mut buf = vec![0xaau8; 50];
		assert_eq!(ee.read(21, &mut buf, None), Ok(()));
		assert!(buf.iter().all(|b| *b == 0));

		// neighbours untouched
		let mem = ee.bus().contents(0x50).unwrap();
		assert_eq!(mem[20], pattern(200)[20]);
		assert_eq!(mem[71], pattern(200)[71]);
	}

	#[test]
	fn erase_transactions_stay_inside_pages() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 16, 32);
		assert_eq!(ee.erase(5, 40), Ok(()));

		let tx: Vec<(u32, usize)> = ee.bus().transactions().iter().map(|t| (t.address, t.len)).collect();
		assert_eq!(tx, vec![(5, 11), (16, 5), (21, 11), (32, 5), (37, 8)]);
	}

	#[test]
	fn out_of_bounds_issues_no_transaction() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 64, 4);

		assert_eq!(ee.write(250, &pattern(10)), Err(EepromError::OutOfBounds));
		assert_eq!(ee.erase(200, 57), Err(EepromError::OutOfBounds));
		let mut buf = [0u8; 300];
		assert_eq!(ee.read(0, &mut buf, None), Err(EepromError::OutOfBounds));
		assert_eq!(ee.write(u32::max_value() - 5, &pattern(10)), Err(EepromError::OutOfBounds));
		assert_eq!(ee.erase(u32::max_value() - 5, 10), Err(EepromError::OutOfBounds));

		assert!(ee.bus().transactions().is_empty());
		assert_eq!(status_code(&ee.write(256, &[1])), STATUS_OUT_OF_BOUNDS);
	}

	#[test]
	fn range_ending_at_capacity_is_rejected() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 64, 4);
		assert_eq!(ee.write(250, &pattern(6)), Err(EepromError::OutOfBounds));
		assert_eq!(ee.write(250, &pattern(5)), Ok(()));
	}

	#[test]
	fn first_bus_fault_aborts_write() {
		let mut bus = MemoryBus::new();
		bus.fail_after(2, 0x20);
		let mut ee = open(&mut bus, 16, 16);

		let status = ee.write(8, &pattern(60));
		assert_eq!(status, Err(EepromError::Bus { status: 0x20, written: 24 }));
		assert_eq!(status_code(&status), 0x20);
		assert_eq!(ee.bus().transactions().len(), 3);
		let mem = ee.bus().contents(0x50).unwrap();
		assert_eq!(&mem[8..32], &pattern(60)[..24]);
		assert_eq!(mem[32], 0xff);
	}

	#[test]
	fn erase_fault_counts_erased_prefix() {
		let mut bus = MemoryBus::new();
		bus.fail_after(3, 9);
		let mut ee = open(&mut bus, 16, 16);

		// chunks: [4,16) [16,20) | [20,32) [32,36) | ...
		assert_eq!(ee.erase(4, 64), Err(EepromError::Bus { status: 9, written: 16 + 12 }));
	}

	#[test]
	fn read_fault_and_completion() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 16, 16);

		let calls = Arc::new(AtomicUsize::new(0));
		let status = Arc::new(AtomicUsize::new(0xffff));
		let completion: ReadCompletion = {
			let calls = calls.clone();
			let status = status.clone();
			Box::new(move |code: u8| {
				calls.fetch_add(1, Ordering::SeqCst);
				status.store(code as usize, Ordering::SeqCst);
			})
		};
		let mut buf = [0u8; 4];
		assert_eq!(ee.read(0, &mut buf, Some(completion)), Ok(()));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(status.load(Ordering::SeqCst), 0);

		ee.bus_mut().fail_after(0, 3);
		let completion: ReadCompletion = {
			let status = status.clone();
			Box::new(move |code: u8| status.store(code as usize, Ordering::SeqCst))
		};
		assert_eq!(ee.read(0, &mut buf, Some(completion)), Err(EepromError::Bus { status: 3, written: 0 }));
		assert_eq!(status.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn rejected_read_never_calls_completion() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 64, 4);

		let calls = Arc::new(AtomicUsize::new(0));
		let completion: ReadCompletion = {
			let calls = calls.clone();
			Box::new(move |_: u8| {
				calls.fetch_add(1, Ordering::SeqCst);
			})
		};
		let mut buf = [0u8; 256];
		assert_eq!(ee.read(0, &mut buf, Some(completion)), Err(EepromError::OutOfBounds));
		assert_eq!(calls.load(Ordering::SeqCst), 0);
		// the closure was dropped, not leaked
		assert_eq!(Arc::strong_count(&calls), 1);
		assert!(ee.bus().transactions().is_empty());
	}

	#[test]
	fn read_vec_checks_range_before_allocating() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 64, 4);
		assert_eq!(ee.write(10, &pattern(20)), Ok(()));

		// would need 4 GiB if allocated first
		assert_eq!(ee.read_vec(0, u32::max_value()), Err(EepromError::OutOfBounds));
		assert_eq!(ee.read_vec(250, 6), Err(EepromError::OutOfBounds));
		assert_eq!(ee.read_vec(10, 20), Ok(pattern(20)));
	}

	#[test]
	fn zero_length_requests() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 16, 16);
		assert_eq!(ee.write(10, &[]), Ok(()));
		assert_eq!(ee.erase(10, 0), Ok(()));
		assert!(ee.bus().transactions().is_empty());
	}

	#[test]
	fn three_byte_addressing() {
		let mut bus = MemoryBus::new();
		let mut ee = open(&mut bus, 256, 512);
		assert_eq!(ee.geometry().address_width(), AddressWidth::Three);

		let data = pattern(300);
		assert_eq!(ee.write(0x1_00f0, &data), Ok(()));
		let mut buf = vec![0u8; 300];
		assert_eq!(ee.read(0x1_00f0, &mut buf, None), Ok(()));
		assert_eq!(buf, data);
	}
}
