use std::time::Duration;

use crate::eeprom::AddressWidth;

use super::{
	Bus,
	BusFault,
	FAULT_NACK,
	ReadCompletion,
	Speed,
	complete,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
	Write,
	Read,
}

/// One transaction as seen on the emulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transaction {
	pub bus_address: u8,
	pub kind: TransactionKind,
	pub address: u32,
	pub len: usize,
	pub delay: Duration,
}

impl Transaction {
	pub fn end(&self) -> u32 {
		self.address + self.len as u32
	}
}

#[derive(Debug)]
struct Chip {
	bus_address: u8,
	page_size: usize,
	memory: Vec<u8>,
	registration: Option<(AddressWidth, Speed)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHandle {
	chip: usize,
	address_width: AddressWidth,
}

/// Emulated bus with 24Cxx-like chips behind it.
///
/// Page writes wrap around inside the addressed page the same way real
/// chips do, and sequential reads roll over from the last byte to the
/// first one.
#[derive(Debug, Default)]
pub struct MemoryBus {
	chips: Vec<Chip>,
	transactions: Vec<Transaction>,
	// (transactions to let through, status to fail with)
	fail_after: Option<(usize, u8)>,
}

impl MemoryBus {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds an erased (all 0xff) chip.
	pub fn attach(&mut self, bus_address: u8, size: usize, page_size: usize) -> &mut Self {
		assert!(page_size > 0 && size % page_size == 0);
		assert!(self.chip_index(bus_address).is_none(), "chip 0x{:02x} attached twice", bus_address);
		self.chips.push(Chip {
			bus_address,
			page_size,
			memory: vec![0xff; size],
			registration: None,
		});
		self
	}

	/// Lets `transactions` more transactions succeed, then fails the
	/// next one with `status`.
	pub fn fail_after(&mut self, transactions: usize, status: u8) -> &mut Self {
		assert!(status != 0);
		self.fail_after = Some((transactions, status));
		self
	}

	pub fn transactions(&self) -> &[Transaction] {
		&self.transactions
	}

	pub fn clear_transactions(&mut self) {
		self.transactions.clear();
	}

	pub fn contents(&self, bus_address: u8) -> Option<&[u8]> {
		self.chip_index(bus_address).map(|i| &self.chips[i].memory[..])
	}

	pub fn speed(&self, bus_address: u8) -> Option<Speed> {
		let chip = &self.chips[self.chip_index(bus_address)?];
		chip.registration.map(|(_, speed)| speed)
	}

	fn chip_index(&self, bus_address: u8) -> Option<usize> {
		self.chips.iter().position(|c| c.bus_address == bus_address)
	}

	fn injected_fault(&mut self) -> Result<(), BusFault> {
		match self.fail_after {
			Some((0, status)) => {
				self.fail_after = None;
				Err(BusFault(status))
			},
			Some((ref mut remaining, _)) => {
				*remaining -= 1;
				Ok(())
			},
			None => Ok(()),
		}
	}

	fn start(&mut self, handle: &MemoryHandle, kind: TransactionKind, address: u32, len: usize, delay: Duration) -> Result<(), BusFault> {
		let bus_address = self.chips[handle.chip].bus_address;
		self.transactions.push(Transaction { bus_address, kind, address, len, delay });
		self.injected_fault()?;
		if !handle.address_width.can_address(address) {
			warn!("bus 0x{:02x}: address 0x{:x} doesn't fit {} address bytes", bus_address, address, handle.address_width.bytes());
			return Err(BusFault(FAULT_NACK));
		}
		Ok(())
	}
}

impl Bus for MemoryBus {
	type Handle = MemoryHandle;

	fn register_device(&mut self, bus_address: u8, address_width: AddressWidth, speed: Speed) -> crate::AResult<Self::Handle> {
		let chip = match self.chip_index(bus_address) {
			Some(i) => i,
			None => bail!("no device at bus address 0x{:02x}", bus_address),
		};
		ensure!(self.chips[chip].registration.is_none(), "device 0x{:02x} already registered", bus_address);
		self.chips[chip].registration = Some((address_width, speed));

		Ok(MemoryHandle { chip, address_width })
	}

	fn write(&mut self, handle: &Self::Handle, address: u32, data: &[u8], delay: Duration) -> Result<(), BusFault> {
		self.start(handle, TransactionKind::Write, address, data.len(), delay)?;

		let chip = &mut self.chips[handle.chip];
		let size = chip.memory.len();
		let address = address as usize % size;
		let page_start = address - address % chip.page_size;
		for (i, b) in data.iter().enumerate() {
			// internal address counter only increments the in-page bits
			let offset = (address + i - page_start) % chip.page_size;
			chip.memory[page_start + offset] = *b;
		}
		Ok(())
	}

	fn read(&mut self, handle: &Self::Handle, address: u32, data: &mut [u8], completion: Option<ReadCompletion>) -> Result<(), BusFault> {
		let result = self.start(handle, TransactionKind::Read, address, data.len(), Duration::from_millis(0));

		if result.is_ok() {
			let chip = &self.chips[handle.chip];
			let size = chip.memory.len();
			for (i, b) in data.iter_mut().enumerate() {
				*b = chip.memory[(address as usize + i) % size];
			}
		}

		complete(completion, &result);
		result
	}
}
