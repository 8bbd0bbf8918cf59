// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 memory-mapped capture device
//!
//! Device open, capability checks and format negotiation go through the `v4l`
//! device API. Buffers are driven through the crate's raw layer
//! (`v4l::v4l2::ioctl` with the `v4l_sys` structs) rather than
//! `v4l::io::mmap::Stream`, because the ring decides when each slot goes back
//! to the driver and `Stream` re-queues implicitly on `next()`.

use super::{CaptureDevice, CaptureFormat, DequeuedSlot};
use crate::constants::capture::DEQUEUE_TIMEOUT;
use crate::errors::{PipelineError, PipelineResult};
use crate::media::formats::PixelFormat;
use crate::media::time_base::TimeBase;
use std::io;
use std::os::raw::{c_int, c_void};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::{Flags as BufferFlags, Type as BufferType};
use v4l::capability::Flags;
use v4l::memory::Memory;
use v4l::prelude::*;
use v4l::v4l2::{self, vidioc};
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Format, FourCC, Fraction};

/// Index left in a DQBUF argument so a failed call that dequeued nothing is
/// recognisable
const NO_INDEX: u32 = u32::MAX;

fn capture_buffer(index: u32) -> v4l2_buffer {
    v4l2_buffer {
        index,
        type_: BufferType::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        ..unsafe { std::mem::zeroed() }
    }
}

fn buffer_request(count: u32) -> v4l2_requestbuffers {
    v4l2_requestbuffers {
        count,
        type_: BufferType::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        ..unsafe { std::mem::zeroed() }
    }
}

/// Issue an ioctl, retrying when a signal interrupts it
fn xioctl<T>(fd: c_int, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    loop {
        match unsafe { v4l2::ioctl(fd, request, arg as *mut T as *mut c_void) } {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Turn the outcome of `VIDIOC_DQBUF` into a slot for the ring
///
/// A driver may hand a buffer back while failing with `EIO`. When it did
/// (the index was filled in), the slot is reported as corrupt so the ring
/// still re-queues it.
fn dequeued_slot(
    result: io::Result<()>,
    buf: &v4l2_buffer,
    slots: usize,
) -> PipelineResult<DequeuedSlot> {
    match result {
        Ok(()) => Ok(DequeuedSlot {
            index: buf.index,
            bytes_used: buf.bytesused as usize,
            error: BufferFlags::from(buf.flags).contains(BufferFlags::ERROR),
            sequence: buf.sequence,
        }),
        Err(e) if e.raw_os_error() == Some(libc::EIO) && (buf.index as usize) < slots => {
            warn!(index = buf.index, error = %e, "Driver returned a buffer with an I/O error");
            Ok(DequeuedSlot {
                index: buf.index,
                bytes_used: 0,
                error: true,
                sequence: buf.sequence,
            })
        }
        Err(e) => Err(match e.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EIO) => {
                PipelineError::Capture(format!("VIDIOC_DQBUF: {}", e))
            }
            _ => PipelineError::Device(format!("VIDIOC_DQBUF failed: {}", e)),
        }),
    }
}

/// One driver buffer mapped into our address space
struct Mapping {
    ptr: *mut c_void,
    len: usize,
}

// Plain shared memory; access is serialised by `&mut` on the owning device
unsafe impl Send for Mapping {}

impl Mapping {
    fn new(fd: c_int, buf: &v4l2_buffer) -> io::Result<Self> {
        let len = buf.length as usize;
        let ptr = unsafe {
            v4l2::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                buf.m.offset as libc::off_t,
            )?
        };
        Ok(Self { ptr, len })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(e) = unsafe { v4l2::munmap(self.ptr, self.len) } {
            warn!(error = %e, "Failed to unmap capture buffer");
        }
    }
}

/// A V4L2 video capture node
pub struct V4l2Device {
    // Mappings must go before the device closes its fd
    mappings: Vec<Mapping>,
    device: Device,
    path: PathBuf,
    format: CaptureFormat,
    timeout: Duration,
}

impl V4l2Device {
    /// Open `path`, check it can stream video, and negotiate `requested`
    ///
    /// A device that adjusts the request (different size or interval) is not
    /// an error; the negotiated values are available from [`format`](Self::format).
    pub fn open(path: &Path, requested: &CaptureFormat) -> PipelineResult<Self> {
        let device = Device::with_path(path).map_err(|e| {
            PipelineError::Device(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let caps = device.query_caps().map_err(|e| {
            PipelineError::Device(format!("Failed to query {}: {}", path.display(), e))
        })?;
        info!(
            path = %path.display(),
            driver = %caps.driver,
            card = %caps.card,
            bus = %caps.bus,
            "Opened capture device"
        );
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(PipelineError::Device(format!(
                "{} is not a video capture device",
                path.display()
            )));
        }
        if !caps.capabilities.contains(Flags::STREAMING) {
            warn!(path = %path.display(), "Device does not advertise streaming I/O");
        }

        let format = negotiate(&device, requested)?;

        Ok(Self {
            mappings: Vec::new(),
            device,
            path: path.to_path_buf(),
            format,
            timeout: DEQUEUE_TIMEOUT,
        })
    }

    /// Format and frame interval the device actually uses
    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    fn request_buffers(&self, count: u32) -> io::Result<u32> {
        let mut req = buffer_request(count);
        xioctl(self.fd(), vidioc::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn map_buffers(&mut self, count: u32) -> PipelineResult<Vec<usize>> {
        let fd = self.fd();
        let mut lengths = Vec::with_capacity(count as usize);
        for index in 0..count {
            let mut buf = capture_buffer(index);
            xioctl(fd, vidioc::VIDIOC_QUERYBUF, &mut buf).map_err(|e| {
                PipelineError::Device(format!("VIDIOC_QUERYBUF {} failed: {}", index, e))
            })?;
            let mapping = Mapping::new(fd, &buf).map_err(|e| {
                PipelineError::Device(format!("Failed to map buffer {}: {}", index, e))
            })?;
            debug!(index, length = buf.length, "Mapped capture buffer");
            lengths.push(mapping.len);
            self.mappings.push(mapping);
        }
        Ok(lengths)
    }

    /// Wait until the device has a filled buffer
    fn wait_readable(&self) -> PipelineResult<()> {
        let timeout_ms = self.timeout.as_millis().min(i32::MAX as u128) as i32;
        match self.device.handle().poll(libc::POLLIN, timeout_ms) {
            Ok(0) => Err(PipelineError::Capture(format!(
                "No frame within {} ms",
                timeout_ms
            ))),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                Err(PipelineError::Capture("Interrupted while waiting".into()))
            }
            Err(e) => Err(PipelineError::Device(format!("poll failed: {}", e))),
        }
    }

    fn stream_ioctl(&self, request: vidioc::_IOC_TYPE, what: &str) -> PipelineResult<()> {
        let mut buf_type = BufferType::VideoCapture as c_int;
        xioctl(self.fd(), request, &mut buf_type)
            .map_err(|e| PipelineError::Device(format!("{} failed: {}", what, e)))
    }
}

/// Apply the requested format and interval, then read back what stuck
fn negotiate(device: &Device, requested: &CaptureFormat) -> PipelineResult<CaptureFormat> {
    let fourcc = FourCC::new(&requested.pixel_format.fourcc());
    let wanted = Format::new(requested.width, requested.height, fourcc);
    if let Err(e) = device.set_format(&wanted) {
        warn!(error = %e, "Failed to set capture format, using current format");
    }
    let params = Parameters::new(Fraction::new(
        requested.time_base.num,
        requested.time_base.den,
    ));
    if let Err(e) = device.set_params(&params) {
        warn!(error = %e, "Failed to set frame interval, using current interval");
    }

    let actual = device
        .format()
        .map_err(|e| PipelineError::Device(format!("Failed to read format: {}", e)))?;
    let pixel_format = PixelFormat::from_fourcc(&actual.fourcc.repr).ok_or_else(|| {
        PipelineError::Device(format!("Unsupported pixel format {}", actual.fourcc))
    })?;

    let interval = device
        .params()
        .map_err(|e| PipelineError::Device(format!("Failed to read frame interval: {}", e)))?
        .interval;
    let time_base = match TimeBase::new(interval.numerator, interval.denominator) {
        Some(tb) => tb,
        None => {
            warn!(
                numerator = interval.numerator,
                denominator = interval.denominator,
                "Device reported no frame interval, keeping requested one"
            );
            requested.time_base
        }
    };

    let negotiated = CaptureFormat {
        width: actual.width,
        height: actual.height,
        pixel_format,
        time_base,
    };
    if negotiated != *requested {
        warn!(
            requested = ?requested,
            negotiated = ?negotiated,
            "Device adjusted the capture format"
        );
    }
    info!(
        width = negotiated.width,
        height = negotiated.height,
        format = %negotiated.pixel_format,
        time_base = %negotiated.time_base,
        "Capture format negotiated"
    );
    Ok(negotiated)
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn request_slots(&mut self, count: u32) -> PipelineResult<Vec<usize>> {
        let granted = self
            .request_buffers(count)
            .map_err(|e| PipelineError::Device(format!("VIDIOC_REQBUFS failed: {}", e)))?;
        if granted == 0 {
            return Err(PipelineError::Device("Driver granted no buffers".into()));
        }

        match self.map_buffers(granted) {
            Ok(lengths) => Ok(lengths),
            Err(e) => {
                // Unwind whatever was mapped before the failure
                let _ = self.release_slots();
                Err(e)
            }
        }
    }

    fn enqueue(&mut self, index: u32) -> PipelineResult<()> {
        let mut buf = capture_buffer(index);
        xioctl(self.fd(), vidioc::VIDIOC_QBUF, &mut buf)
            .map_err(|e| PipelineError::Device(format!("VIDIOC_QBUF {} failed: {}", index, e)))
    }

    fn dequeue(&mut self) -> PipelineResult<DequeuedSlot> {
        self.wait_readable()?;

        let mut buf = capture_buffer(NO_INDEX);
        let result = xioctl(self.fd(), vidioc::VIDIOC_DQBUF, &mut buf);
        dequeued_slot(result, &buf, self.mappings.len())
    }

    fn slot_data(&self, index: u32) -> Option<&[u8]> {
        self.mappings.get(index as usize).map(Mapping::as_slice)
    }

    fn stream_on(&mut self) -> PipelineResult<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMON, "VIDIOC_STREAMON")
    }

    fn stream_off(&mut self) -> PipelineResult<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMOFF, "VIDIOC_STREAMOFF")
    }

    fn release_slots(&mut self) -> PipelineResult<()> {
        self.mappings.clear();
        self.request_buffers(0)
            .map(|_| ())
            .map_err(|e| PipelineError::Device(format!("Failed to free buffers: {}", e)))
    }
}
