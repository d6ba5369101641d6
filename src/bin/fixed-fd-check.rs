//! Exercise fixed fd install and close-direct against a driver.
//!
//! Runs each scenario in turn and exits 0 when all pass, 1 on the first
//! failure, 77 when the engine cannot install fixed descriptors.

use clap::Parser;
use fixed_fd::config::Config;
use fixed_fd::{
    Cqe, DriverBuilder, Error, INSTALL_CLOEXEC, IoDriver, IoEngine, OpTag, Sqe, SqeFlags,
    UserData, logging, regular,
};
use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;

const EXIT_PASS: i32 = 0;
const EXIT_FAIL: i32 = 1;
const EXIT_SKIP: i32 = 77;

const HELLO: &[u8] = b"Hello";

#[derive(Parser)]
#[command(name = "fixed-fd-check")]
#[command(about = "Check fixed descriptor install and close-direct behavior")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Engine to test: auto, emulated or uring (overrides the config file)
    #[arg(short, long)]
    engine: Option<IoEngine>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error("skipped: {0}")]
    Skip(String),
    #[error("{0}")]
    Fail(String),
    #[error("driver: {0}")]
    Driver(#[from] Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

type Check = Result<(), Failure>;

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(EXIT_FAIL);
            }
        },
        None => Config::default(),
    };
    if let Some(engine) = args.engine {
        config.engine = engine;
    }

    logging::init(&config.logging);

    let mut driver = match DriverBuilder::from_config(&config).build() {
        Ok(driver) => driver,
        Err(Error::Unsupported(reason)) => {
            tracing::warn!(%reason, "engine unavailable, skipping");
            std::process::exit(EXIT_SKIP);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to create driver");
            std::process::exit(EXIT_FAIL);
        }
    };
    tracing::info!(engine = %driver.engine(), "running fixed fd checks");

    std::process::exit(run(driver.as_mut()));
}

fn run(driver: &mut dyn IoDriver) -> i32 {
    let checks: [(&str, fn(&mut dyn IoDriver) -> Check); 5] = [
        ("working", test_working),
        ("bad index 0", |d| test_bad_index(d, 0)),
        ("bad index 500", test_bad_index_registered),
        ("not fixed", test_not_fixed),
        ("flags", test_flags),
    ];

    for (name, check) in checks {
        match check(driver) {
            Ok(()) => tracing::info!(check = name, "passed"),
            Err(Failure::Skip(reason)) => {
                tracing::warn!(check = name, %reason, "skipped");
                return EXIT_SKIP;
            }
            Err(e) => {
                tracing::error!(check = name, error = %e, "failed");
                return EXIT_FAIL;
            }
        }
    }
    EXIT_PASS
}

/// Move a slot into the regular table and keep using it after the slot is
/// released.
fn test_working(driver: &mut dyn IoDriver) -> Check {
    let (rd, wr) = pipe()?;
    driver.register_files(&[rd])?;

    // The slot holds its own reference, so the regular descriptor can go.
    regular::close(rd)?;
    let mut buf = [0u8; 32];
    match regular::read(rd, &mut buf, None) {
        Err(e) if e.raw_os_error() == Some(libc::EBADF) => {}
        other => return Err(fail(format!("read on closed descriptor: {other:?}"))),
    }

    // Submitted before the data exists; completes once it arrives.
    driver.submit(Sqe::read(0, 32).fixed().user_data(tag(OpTag::Read, 0, 1)))?;
    write_all(wr, HELLO)?;
    let cqe = wait(driver, OpTag::Read)?;
    expect_res(&cqe, HELLO.len() as i32, "fixed read")?;
    if cqe.buf() != Some(HELLO) {
        return Err(fail(format!("fixed read returned {:?}", cqe.buf())));
    }

    let cqe = complete(driver, Sqe::fixed_fd_install(0, 0), OpTag::Install, 2)?;
    if cqe.res() == -libc::EINVAL {
        return Err(Failure::Skip("fixed fd install not supported".to_string()));
    }
    let fd = match cqe.result() {
        Ok(fd) => fd as RawFd,
        Err(e) => return Err(fail(format!("install failed: {e}"))),
    };
    if regular::is_cloexec(fd)? {
        return Err(fail(format!("descriptor {fd} is close-on-exec without O_CLOEXEC")));
    }

    write_all(wr, HELLO)?;
    expect_regular_read(fd, "installed descriptor")?;

    let cqe = complete(driver, Sqe::close_direct(0), OpTag::CloseDirect, 3)?;
    expect_res(&cqe, 0, "close direct")?;

    write_all(wr, HELLO)?;
    expect_regular_read(fd, "installed descriptor after close direct")?;

    driver.submit(Sqe::read(0, 32).fixed().user_data(tag(OpTag::Read, 0, 4)))?;
    write_all(wr, HELLO)?;
    let cqe = wait(driver, OpTag::Read)?;
    expect_res(&cqe, -libc::EBADF, "fixed read after close direct")?;

    regular::close(fd)?;
    regular::close(wr)?;
    driver.unregister_files()?;
    Ok(())
}

/// Install from an index that names no slot.
fn test_bad_index(driver: &mut dyn IoDriver, index: i32) -> Check {
    let cqe = complete(driver, Sqe::fixed_fd_install(index, 0), OpTag::Install, 5)?;
    expect_res(&cqe, -libc::EBADF, "install from missing slot")
}

/// Out of range install and close-direct with slot 0 in use.
fn test_bad_index_registered(driver: &mut dyn IoDriver) -> Check {
    let (rd, wr) = pipe()?;
    driver.register_files(&[rd])?;

    test_bad_index(driver, 500)?;
    let cqe = complete(driver, Sqe::close_direct(500), OpTag::CloseDirect, 6)?;
    expect_res(&cqe, -libc::EBADF, "close direct out of range")?;

    regular::close(rd)?;
    regular::close(wr)?;
    driver.unregister_files()?;
    Ok(())
}

/// An install without the fixed tag is refused.
fn test_not_fixed(driver: &mut dyn IoDriver) -> Check {
    let (rd, wr) = pipe()?;
    driver.register_files(&[rd])?;

    let sqe = Sqe::fixed_fd_install(0, 0).flags(SqeFlags::empty());
    let cqe = complete(driver, sqe, OpTag::Install, 7)?;
    expect_res(&cqe, -libc::EBADF, "install without fixed tag")?;

    regular::close(rd)?;
    regular::close(wr)?;
    driver.unregister_files()?;
    Ok(())
}

/// Only O_CLOEXEC is accepted.
fn test_flags(driver: &mut dyn IoDriver) -> Check {
    let (rd, wr) = pipe()?;
    driver.register_files(&[rd])?;

    let sqe = Sqe::fixed_fd_install(0, libc::O_APPEND as u32);
    let cqe = complete(driver, sqe, OpTag::Install, 8)?;
    expect_res(&cqe, -libc::EINVAL, "install with O_APPEND")?;

    let cqe = complete(
        driver,
        Sqe::fixed_fd_install(0, INSTALL_CLOEXEC),
        OpTag::Install,
        9,
    )?;
    let fd = match cqe.result() {
        Ok(fd) => fd as RawFd,
        Err(e) => return Err(fail(format!("install with O_CLOEXEC failed: {e}"))),
    };
    if !regular::is_cloexec(fd)? {
        return Err(fail(format!("descriptor {fd} missing FD_CLOEXEC")));
    }

    regular::close(rd)?;
    regular::close(wr)?;
    regular::close(fd)?;
    driver.unregister_files()?;
    Ok(())
}

fn tag(op: OpTag, index: u32, seq: u32) -> u64 {
    UserData::encode(op, index, seq).raw()
}

/// Submit and wait for the matching completion.
fn complete(driver: &mut dyn IoDriver, sqe: Sqe, op: OpTag, seq: u32) -> Result<Cqe, Failure> {
    let index = sqe.fd.max(0) as u32;
    driver.submit(sqe.user_data(tag(op, index, seq)))?;
    wait(driver, op)
}

fn wait(driver: &mut dyn IoDriver, op: OpTag) -> Result<Cqe, Failure> {
    let cqe = driver.wait_cqe()?;
    let got = UserData::from_raw(cqe.user_data()).tag();
    if got != Some(op) {
        return Err(fail(format!("expected {op:?} completion, got {got:?}")));
    }
    tracing::debug!(op = ?op, res = cqe.res(), "completion");
    Ok(cqe)
}

fn expect_res(cqe: &Cqe, want: i32, what: &str) -> Check {
    if cqe.res() != want {
        return Err(fail(format!("{what}: expected {want}, got {}", cqe.res())));
    }
    Ok(())
}

fn expect_regular_read(fd: RawFd, what: &str) -> Check {
    let mut buf = [0u8; 32];
    let n = regular::read(fd, &mut buf, None)?;
    if &buf[..n] != HELLO {
        return Err(fail(format!("{what}: read {:?}", &buf[..n])));
    }
    Ok(())
}

fn write_all(fd: RawFd, data: &[u8]) -> Check {
    let n = regular::write(fd, data, None)?;
    if n != data.len() {
        return Err(fail(format!("short write {n}")));
    }
    Ok(())
}

fn fail(msg: String) -> Failure {
    Failure::Fail(msg)
}

fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

fn print_default_config() {
    let config = r#"# fixed-fd-check configuration

# Backend: "auto", "emulated" or "uring"
engine = "auto"

# Submissions that may be queued before submit reports a full queue
sq_entries = 256

# Worker threads executing operations (0 = number of CPUs)
workers = 4

# Largest fixed file table that may be registered
max_fixed_files = 1024

# Lowest descriptor number used for the fixed table's private duplicates
fixed_fd_floor = 512

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
# Can be overridden with RUST_LOG environment variable
level = "info"
# Log format: "pretty" (human-readable), "json", or "compact"
format = "pretty"
# Include timestamps
timestamps = true
# Include thread names
thread_names = false
# Include module target
target = true
"#;
    print!("{}", config);
}
