//! End-to-end fixed fd install scenario.
//!
//! Kept alone in its own test binary: it closes a regular descriptor and
//! then expects its number to stay unused, which only holds while no other
//! test is opening files concurrently.

mod common;

use common::complete;
use fixed_fd::{Driver, IoDriver, IoEngine, OpError, Sqe};
use std::os::fd::{IntoRawFd, RawFd};

fn write_hello(fd: RawFd) {
    assert_eq!(fixed_fd::regular::write(fd, b"Hello", None).unwrap(), 5);
}

fn read_hello(fd: RawFd) {
    let mut buf = [0u8; 32];
    let n = fixed_fd::regular::read(fd, &mut buf, None).unwrap();
    assert_eq!(&buf[..n], b"Hello");
}

#[test]
fn test_install_then_close_direct() {
    let mut driver = Driver::builder()
        .engine(IoEngine::Emulated)
        .workers(2)
        .max_fixed_files(16)
        .fixed_fd_floor(256)
        .build()
        .unwrap();

    let (rd, wr) = common::pipe();
    let (rd, wr) = (rd.into_raw_fd(), wr.into_raw_fd());
    driver.register_files(&[rd]).unwrap();

    // The slot keeps the pipe alive without the regular descriptor.
    fixed_fd::regular::close(rd).unwrap();
    let mut buf = [0u8; 1];
    let err = fixed_fd::regular::read(rd, &mut buf, None).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));

    // A fixed read submitted before the data arrives.
    driver.submit(Sqe::read(0, 32).fixed().user_data(1)).unwrap();
    write_hello(wr);
    let cqe = driver.wait_cqe().unwrap();
    assert_eq!(cqe.user_data(), 1);
    assert_eq!(cqe.res(), 5);

    let fd = complete(driver.as_mut(), Sqe::fixed_fd_install(0, 0).user_data(2))
        .result()
        .unwrap() as RawFd;
    assert!(!fixed_fd::regular::is_cloexec(fd).unwrap());
    write_hello(wr);
    read_hello(fd);

    let cqe = complete(driver.as_mut(), Sqe::close_direct(0).user_data(3));
    assert_eq!(cqe.res(), 0);

    write_hello(wr);
    read_hello(fd);

    driver.submit(Sqe::read(0, 32).fixed().user_data(4)).unwrap();
    write_hello(wr);
    let cqe = driver.wait_cqe().unwrap();
    assert_eq!(cqe.user_data(), 4);
    assert_eq!(cqe.result(), Err(OpError::BadDescriptor));

    fixed_fd::regular::close(fd).unwrap();
    fixed_fd::regular::close(wr).unwrap();
    driver.unregister_files().unwrap();

    // With no table every index is bad.
    for index in [0, 500] {
        let cqe = complete(driver.as_mut(), Sqe::fixed_fd_install(index, 0).user_data(5));
        assert_eq!(cqe.res(), -libc::EBADF);
    }
    assert_eq!(driver.in_flight(), 0);
}
