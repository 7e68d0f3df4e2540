#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate neeprom;
use neeprom::*;

use std::fs;
use std::io::{
	self,
	Write,
};
use std::process::exit;

use neeprom::bus::{
	Bus,
	LinuxI2cBus,
	MemoryBus,
};

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<T>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	param.parse::<T>().map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid paramater {}: {}", name, e);
		e.context(msg).into()
	})
}

// decimal or "0x"-prefixed hexadecimal
fn get_number(matches: &clap::ArgMatches, name: &str) -> AResult<u32> {
	let param: String = get_param(matches, name)?;
	let number = if param.starts_with("0x") {
		u32::from_str_radix(&param[2..], 16)
	} else {
		param.parse::<u32>()
	};
	number.map_err(|e| format_err!("invalid number for {}: {:?}: {}", name, param, e))
}

fn hexdump(base: u32, data: &[u8]) {
	for (i, b) in data.iter().enumerate() {
		if 0 == i % 16 {
			print!("{:08x} ", base as usize + i);
		} else if 0 == i % 8 {
			print!(" ");
		}
		print!(" {:02x}", b);
		if 15 == i % 16 {
			println!();
		}
	}
	if 0 != data.len() % 16 {
		println!();
	}
}

fn read<B: Bus>(ee: &mut Eeprom<B>, sub_m: &clap::ArgMatches) -> AResult<()> {
	let offset = get_number(sub_m, "OFFSET")?;
	let length = get_number(sub_m, "LENGTH")?;

	let buf = ee.read_vec(offset, length)?;

	if sub_m.is_present("raw") {
		io::stdout().write_all(&buf)?;
	} else {
		hexdump(offset, &buf);
	}

	Ok(())
}

fn write<B: Bus>(ee: &mut Eeprom<B>, sub_m: &clap::ArgMatches) -> AResult<()> {
	let offset = get_number(sub_m, "OFFSET")?;
	let file: String = get_param(sub_m, "FILE")?;

	let data = fs::read(&file).map_err(|e| format_err!("couldn't read {}: {}", file, e))?;
	ee.write(offset, &data)?;
	info!("wrote {} bytes at 0x{:x}", data.len(), offset);

	Ok(())
}

fn erase<B: Bus>(ee: &mut Eeprom<B>, sub_m: &clap::ArgMatches) -> AResult<()> {
	let offset = get_number(sub_m, "OFFSET")?;
	let length = get_number(sub_m, "LENGTH")?;

	ee.erase(offset, length)?;
	info!("erased {} bytes at 0x{:x}", length, offset);

	Ok(())
}

fn run<B: Bus>(ee: &mut Eeprom<B>, matches: &clap::ArgMatches) -> AResult<()> {
	match matches.subcommand() {
		("info", _) => {
			println!("{}", ee.geometry());
			Ok(())
		},
		("read", Some(sub_m)) => {
			read(ee, sub_m)
		},
		("write", Some(sub_m)) => {
			write(ee, sub_m)
		},
		("erase", Some(sub_m)) => {
			erase(ee, sub_m)
		},
		("", _) => bail!("no subcommand"),
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@arg bus: -b --bus +takes_value "I2C bus device to use (e.g. /dev/i2c-1)")
		(@arg simulate: --simulate "use an emulated, erased EEPROM instead of a real bus")
		(@arg address: -a --address +takes_value "device address (A0..A7 or 0x50..0x57; default: A0)")
		(@arg page_size: -p --("page-size") +takes_value +required "page size in bytes")
		(@arg page_count: -c --("page-count") +takes_value +required "number of pages")
		(@subcommand info =>
			(about: "show EEPROM geometry")
		)
		(@subcommand read =>
			(about: "read EEPROM data and hexdump it")
			(@arg raw: -r --raw "write binary data to stdout")
			(@arg OFFSET: +required "start address")
			(@arg LENGTH: +required "number of bytes")
		)
		(@subcommand write =>
			(about: "write file content to EEPROM")
			(@arg OFFSET: +required "start address")
			(@arg FILE: +required "file with data to write")
		)
		(@subcommand erase =>
			(about: "overwrite EEPROM range with zeroes")
			(@arg OFFSET: +required "start address")
			(@arg LENGTH: +required "number of bytes")
		)
	).get_matches();

	let address: DeviceAddress = match matches.value_of("address") {
		Some(_) => get_param(&matches, "address")?,
		None => DeviceAddress::A0,
	};
	let page_size = get_number(&matches, "page_size")?;
	let page_count = get_number(&matches, "page_count")?;
	let geometry = Geometry::new(address, page_size, page_count)?;

	if matches.is_present("simulate") {
		ensure!(!matches.is_present("bus"), "--simulate and --bus are exclusive");
		let mut bus = MemoryBus::new();
		bus.attach(address.bus_address(), geometry.memory_size() as usize, page_size as usize);
		let mut ee = geometry.initialize(&mut bus)?;
		run(&mut ee, &matches)?;
		for t in ee.into_bus().transactions() {
			info!("simulated {:?} of {} bytes at 0x{:x}", t.kind, t.len, t.address);
		}
		Ok(())
	} else {
		let path: String = match matches.value_of("bus") {
			Some(p) => p.into(),
			None => bail!("need either --bus or --simulate"),
		};
		let bus = LinuxI2cBus::open(&path)?;
		debug!("using I2C bus {}", bus.path().display());
		let mut ee = geometry.initialize(bus)?;
		run(&mut ee, &matches)
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
