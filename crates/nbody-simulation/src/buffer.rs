//! Typed device-resident buffers

use crate::{GpuContext, SimError};
use bytemuck::Pod;
use std::marker::PhantomData;

/// Smallest allocation; zero-sized storage bindings are invalid
const MIN_BUFFER_SIZE: u64 = 16;

/// Something a program can bind at a fixed slot of bind group 0
pub trait Bindable {
    fn slot(&self) -> u32;
    fn binding(&self) -> wgpu::BindingResource<'_>;
}

/// A storage buffer of `T` records that remembers how many it holds.
///
/// All operations go through the one [`GpuContext`] queue, so uploads,
/// dispatches and downloads are ordered by submission.
pub struct GpuBuffer<T: Pod> {
    label: String,
    slot: u32,
    buffer: wgpu::Buffer,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> GpuBuffer<T> {
    /// Create an empty buffer that programs will see at `slot`
    pub fn allocate(ctx: &GpuContext, label: impl Into<String>, slot: u32) -> Self {
        let label = label.into();
        let buffer = create_storage(ctx, &label, MIN_BUFFER_SIZE);
        Self {
            label,
            slot,
            buffer,
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Replace the device contents with `data`
    pub fn upload(&mut self, ctx: &GpuContext, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = padded_size(bytes.len() as u64);

        if self.buffer.size() != size {
            log::debug!("Reallocating {} to {} bytes", self.label, size);
            self.buffer = create_storage(ctx, &self.label, size);
        }

        if !bytes.is_empty() {
            if bytes.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
                ctx.queue.write_buffer(&self.buffer, 0, bytes);
            } else {
                let mut padded = bytes.to_vec();
                padded.resize(aligned(bytes.len() as u64) as usize, 0);
                ctx.queue.write_buffer(&self.buffer, 0, &padded);
            }
        }
        self.len = data.len();
    }

    /// Read back exactly the last uploaded number of records.
    ///
    /// Blocks until every previously submitted command touching the buffer
    /// has completed.
    pub fn download(&self, ctx: &GpuContext) -> Result<Vec<T>, SimError> {
        if self.len == 0 {
            return Ok(Vec::new());
        }

        let byte_len = (self.len * std::mem::size_of::<T>()) as u64;
        let copy_size = aligned(byte_len);

        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} Staging", self.label)),
            size: copy_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, copy_size);
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.wait_idle()?;
        receiver.recv().map_err(|_| SimError::ReadbackLost)??;

        let records = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, T>(&data[..byte_len as usize]).to_vec()
        };
        staging.unmap();

        Ok(records)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Raw handle, for callers drawing straight from the buffer
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl<T: Pod> Bindable for GpuBuffer<T> {
    fn slot(&self) -> u32 {
        self.slot
    }

    fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

fn create_storage(ctx: &GpuContext, label: &str, size: u64) -> wgpu::Buffer {
    ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

fn aligned(size: u64) -> u64 {
    size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

fn padded_size(size: u64) -> u64 {
    aligned(size).max(MIN_BUFFER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(0), 16);
        assert_eq!(padded_size(6), 16);
        assert_eq!(padded_size(17), 20);
        assert_eq!(padded_size(64), 64);
    }
}
