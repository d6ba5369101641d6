#![allow(dead_code)]

use fixed_fd::emulated::EmulatedDriver;
use fixed_fd::{Cqe, IoDriver, Sqe};
use std::os::fd::{FromRawFd, OwnedFd};

/// A close-on-exec pipe as (read end, write end).
pub fn pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [0; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    assert_eq!(ret, 0, "pipe2: {}", std::io::Error::last_os_error());
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

/// A small emulated driver whose slot duplicates start at descriptor 256.
pub fn driver() -> EmulatedDriver {
    EmulatedDriver::with_config(32, 4, 64, 256).unwrap()
}

/// Submit and wait for the completion.
pub fn complete(driver: &mut dyn IoDriver, sqe: Sqe) -> Cqe {
    let user_data = sqe.user_data;
    driver.submit(sqe).unwrap();
    let cqe = driver.wait_cqe().unwrap();
    assert_eq!(cqe.user_data(), user_data);
    cqe
}
