//! One-shot privileged unlock tool.
//!
//! `mmcunlock [PARTITION]` clears the protection bits for one partition,
//! or for every slot when no name is given; `mmcunlock --restore` writes
//! the factory table back. Exits 0 on success and 1 on any failure.

mod diag;
mod logger;

use std::env;
use std::process::ExitCode;

use mmcunlock_core::compat::{self, MapMode, SystemProperties};
use mmcunlock_core::{catalog, run, MapStrategy, Operation, Target};

/// Everything the command line decided
#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    verbose: bool,
    operation: Operation,
    /// Partition name as typed, for the confirmation line
    partition: Option<String>,
}

fn main() -> ExitCode {
    let invocation = match parse_args(env::args().skip(1)) {
        Some(invocation) => invocation,
        None => return usage(),
    };

    logger::init(invocation.verbose);

    match execute(invocation.operation) {
        Ok(()) => {
            println!(
                "{}",
                confirmation(invocation.operation, invocation.partition.as_deref())
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("mmcunlock: {err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args<I>(args: I) -> Option<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let mut verbose = false;
    let mut restore = false;
    let mut partition: Option<String> = None;

    for arg in args {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            "--restore" => restore = true,
            name if !name.starts_with('-') && partition.is_none() => {
                partition = Some(name.to_owned());
            }
            _ => return None,
        }
    }

    // Restore always reverts the whole table; a partition name with it
    // would silently mean something else than it says.
    if restore && partition.is_some() {
        return None;
    }

    let operation = if restore {
        Operation::Restore
    } else {
        match &partition {
            Some(name) => Operation::Unlock(Target::One(catalog::lookup(name)?)),
            None => Operation::Unlock(Target::All),
        }
    };

    Some(Invocation {
        verbose,
        operation,
        partition,
    })
}

/// Detect the device, pick its mapping strategy, and run the operation.
/// Detection comes first: an unsupported handset must fail before the
/// device node is ever opened.
fn execute(operation: Operation) -> mmcunlock_core::Result<()> {
    let profile = compat::detect(&SystemProperties)?;
    log::debug!("Device: {} ({})", profile.model, profile.build_id);

    match profile.map_mode {
        MapMode::Redirected => {
            let mut transport = diag::DiagTransport::open()?;
            run(
                MapStrategy::Redirected {
                    transport: &mut transport,
                    profile,
                },
                operation,
            )
        }
        MapMode::Direct {
            virtual_base,
            length,
        } => run(
            MapStrategy::Direct {
                virtual_base,
                length,
            },
            operation,
        ),
    }
}

fn confirmation(operation: Operation, partition: Option<&str>) -> String {
    match operation {
        Operation::Restore => "Factory protection table restored.".to_owned(),
        Operation::Unlock(Target::All) => "Now all partitions have been unlocked.".to_owned(),
        Operation::Unlock(Target::One(_)) => format!(
            "Now the {} partition has been unlocked.",
            partition.unwrap_or("selected")
        ),
    }
}

fn usage() -> ExitCode {
    eprintln!("Usage: mmcunlock [-v] [--restore] [PARTITION]");
    eprintln!();
    eprintln!("Clears the MMC protection bits for PARTITION, or for every");
    eprintln!("partition when none is given. --restore writes the factory");
    eprintln!("protection table back instead.");
    eprint!("Partitions:");
    for name in catalog::names() {
        eprint!(" {name}");
    }
    eprintln!();
    ExitCode::FAILURE
}
