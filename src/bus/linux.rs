use std::fs;
use std::io::{
	self,
	Read,
	Write,
};
use std::os::unix::io::AsRawFd;
use std::path::{
	Path,
	PathBuf,
};
use std::time::Duration;

use libc::{
	c_ulong,
	ioctl,
};

use crate::eeprom::AddressWidth;

use super::{
	Bus,
	BusFault,
	FAULT_IO,
	ReadCompletion,
	Speed,
	complete,
	reliable_sleep,
};

// from linux/i2c-dev.h
const I2C_SLAVE: c_ulong = 0x0703;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinuxHandle {
	bus_address: u8,
	address_width: AddressWidth,
}

/// Adapter behind a `/dev/i2c-N` character device.
#[derive(Debug)]
pub struct LinuxI2cBus {
	file: fs::File,
	path: PathBuf,
	selected: Option<u8>,
}

impl LinuxI2cBus {
	pub fn open<P: AsRef<Path>>(path: P) -> crate::AResult<Self> {
		let path = path.as_ref().to_path_buf();
		let file = with_context!(("couldn't open I2C bus {}", path.display()), {
			Ok(fs::OpenOptions::new().read(true).write(true).open(&path)?)
		})?;

		Ok(LinuxI2cBus {
			file,
			path,
			selected: None,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn select(&mut self, bus_address: u8) -> io::Result<()> {
		if self.selected == Some(bus_address) {
			return Ok(());
		}
		let res = unsafe {
			ioctl(self.file.as_raw_fd(), I2C_SLAVE as _, bus_address as c_ulong)
		};
		if res < 0 {
			self.selected = None;
			return Err(io::Error::last_os_error());
		}
		self.selected = Some(bus_address);
		Ok(())
	}

	fn write_all(&mut self, handle: &LinuxHandle, buf: &[u8]) -> io::Result<()> {
		self.select(handle.bus_address)?;
		// i2c-dev sends one message per write call
		let l = self.file.write(buf)?;
		if l != buf.len() {
			return Err(io::Error::new(io::ErrorKind::Other, "short write on I2C bus"));
		}
		Ok(())
	}

	fn fault(&self, handle: &LinuxHandle, what: &str, address: u32, e: io::Error) -> BusFault {
		error!("{}: {} at 0x{:x} on device 0x{:02x} failed: {}", self.path.display(), what, address, handle.bus_address, e);
		BusFault(FAULT_IO)
	}
}

impl Bus for LinuxI2cBus {
	type Handle = LinuxHandle;

	fn register_device(&mut self, bus_address: u8, address_width: AddressWidth, speed: Speed) -> crate::AResult<Self::Handle> {
		if let Err(e) = self.select(bus_address) {
			bail!("couldn't select device 0x{:02x} on {}: {}", bus_address, self.path.display(), e);
		}
		// the adapter clock is configured by the kernel (device tree / module parameter)
		debug!("{}: device 0x{:02x} registered, {:?} speed requested but fixed by the adapter", self.path.display(), bus_address, speed);

		Ok(LinuxHandle { bus_address, address_width })
	}

	fn write(&mut self, handle: &Self::Handle, address: u32, data: &[u8], delay: Duration) -> Result<(), BusFault> {
		let mut buf = handle.address_width.encode(address);
		buf.extend_from_slice(data);
		if let Err(e) = self.write_all(handle, &buf) {
			return Err(self.fault(handle, "write", address, e));
		}
		reliable_sleep(delay);
		Ok(())
	}

	fn read(&mut self, handle: &Self::Handle, address: u32, data: &mut [u8], completion: Option<ReadCompletion>) -> Result<(), BusFault> {
		let address_bytes = handle.address_width.encode(address);
		let result = self.write_all(handle, &address_bytes)
			.and_then(|()| self.file.read_exact(data))
			.map_err(|e| self.fault(handle, "read", address, e));

		complete(completion, &result);
		result
	}
}
