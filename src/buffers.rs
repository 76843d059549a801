//! Named image buffers.
//!
//! Every pass target (plus the implicit output) owns one slot. Persistent slots are
//! double-buffered: passes sample the front texture, write the back texture, and the two swap
//! once the write succeeded, so a feedback pass can read its own previous frame without reading
//! and writing one texture in the same pass.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::driver::{BufferRequest, PixelFormat};
use crate::error::{DriverError, EngineError, Result};
use crate::schema::Size;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferKey {
    Output,
    Named(String),
}

impl BufferKey {
    pub fn for_target(target: Option<&str>) -> Self {
        match target {
            Some(name) => Self::Named(name.to_owned()),
            None => Self::Output,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Output => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output => f.write_str("<output>"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Identifies one allocation of a buffer. Reallocation invalidates older handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    key: BufferKey,
    generation: u64,
}

impl BufferHandle {
    pub fn key(&self) -> &BufferKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Reused,
    Created,
    Reallocated,
}

/// Snapshot of one slot, for plans and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub key: BufferKey,
    pub size: Size,
    pub format: PixelFormat,
    pub persistent: bool,
    pub generation: u64,
    pub written_frame: Option<u64>,
}

struct BufferSlot<T> {
    front: T,
    /// Write side of a persistent buffer, allocated on its first write.
    back: Option<T>,
    size: Size,
    format: PixelFormat,
    persistent: bool,
    generation: u64,
    /// Frame whose pass last wrote `front`. `None` while the content is undefined.
    written_frame: Option<u64>,
    /// `written_frame` as it was before the frame in progress first wrote this slot.
    before_frame: Option<Option<u64>>,
}

impl<T> BufferSlot<T> {
    fn request(&self, key: &BufferKey) -> BufferRequest {
        BufferRequest {
            name: key.name().map(str::to_owned),
            size: self.size,
            format: self.format,
            persistent: self.persistent,
        }
    }
}

pub struct BufferManager<T> {
    slots: BTreeMap<BufferKey, BufferSlot<T>>,
    next_generation: u64,
}

impl<T> Default for BufferManager<T> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
            next_generation: 1,
        }
    }
}

impl<T> BufferManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the buffer for `key`, creating it on first use and reallocating it when the size
    /// or format changed. Reallocation discards content, persistent or not. On allocation
    /// failure the previous allocation is left untouched.
    pub fn resolve<F>(
        &mut self,
        key: BufferKey,
        size: Size,
        format: PixelFormat,
        persistent: bool,
        allocate: F,
    ) -> std::result::Result<(BufferHandle, Resolution), DriverError>
    where
        F: FnOnce(&BufferRequest) -> std::result::Result<T, DriverError>,
    {
        if let Some(slot) = self.slots.get_mut(&key) {
            if slot.size == size && slot.format == format {
                slot.persistent = persistent;
                let handle = BufferHandle {
                    key,
                    generation: slot.generation,
                };
                return Ok((handle, Resolution::Reused));
            }
        }

        let request = BufferRequest {
            name: key.name().map(str::to_owned),
            size,
            format,
            persistent,
        };
        let texture = allocate(&request)?;
        let generation = self.next_generation;
        self.next_generation += 1;

        let previous = self.slots.insert(
            key.clone(),
            BufferSlot {
                front: texture,
                back: None,
                size,
                format,
                persistent,
                generation,
                written_frame: None,
                before_frame: None,
            },
        );
        let resolution = match previous {
            Some(old) => {
                debug!(buffer = %key, from = %old.size, to = %size, ?format, "reallocated buffer");
                Resolution::Reallocated
            }
            None => {
                debug!(buffer = %key, %size, ?format, persistent, "created buffer");
                Resolution::Created
            }
        };
        Ok((handle_for(key, generation), resolution))
    }

    /// Current handle for `key`, without allocating.
    pub fn lookup(&self, key: &BufferKey) -> Option<BufferHandle> {
        self.slots
            .get(key)
            .map(|slot| handle_for(key.clone(), slot.generation))
    }

    /// True when sampling `key` during `frame_index` yields defined content: a persistent buffer
    /// (whose content comes from an earlier frame), or a buffer already written this frame.
    pub fn is_readable(&self, key: &BufferKey, frame_index: u64) -> bool {
        self.slots.get(key).is_some_and(|slot| {
            slot.persistent || slot.written_frame == Some(frame_index)
        })
    }

    /// Read access for a pass. Reading a non-persistent buffer that has not been written in
    /// this frame is a usage error rather than a silent read of stale storage.
    pub fn read(&self, handle: &BufferHandle, frame_index: u64, pass_index: usize) -> Result<&T> {
        let slot = self.slot(handle)?;
        if !slot.persistent && slot.written_frame != Some(frame_index) {
            return Err(EngineError::UnwrittenBuffer {
                pass_index,
                buffer: handle.key.to_string(),
            });
        }
        Ok(&slot.front)
    }

    /// Makes sure the write side exists. Persistent buffers get their back texture here.
    pub fn prepare_write<F>(
        &mut self,
        handle: &BufferHandle,
        allocate: F,
    ) -> std::result::Result<(), DriverError>
    where
        F: FnOnce(&BufferRequest) -> std::result::Result<T, DriverError>,
    {
        let Some(slot) = self.slots.get_mut(&handle.key) else {
            return Ok(());
        };
        if slot.persistent && slot.back.is_none() {
            let request = slot.request(&handle.key);
            slot.back = Some(allocate(&request)?);
        }
        Ok(())
    }

    /// Write access for a pass: the back texture of a persistent buffer, the only texture
    /// otherwise.
    pub fn write(&self, handle: &BufferHandle) -> Result<&T> {
        let slot = self.slot(handle)?;
        match (&slot.back, slot.persistent) {
            (Some(back), true) => Ok(back),
            _ => Ok(&slot.front),
        }
    }

    /// Records a successful write, publishing the new content to later readers.
    pub fn commit_write(&mut self, handle: &BufferHandle, frame_index: u64) {
        let Some(slot) = self.slots.get_mut(&handle.key) else {
            return;
        };
        if slot.generation != handle.generation {
            return;
        }
        if slot.before_frame.is_none() {
            slot.before_frame = Some(slot.written_frame);
        }
        if slot.persistent {
            if let Some(back) = slot.back.as_mut() {
                std::mem::swap(&mut slot.front, back);
            }
        }
        slot.written_frame = Some(frame_index);
    }

    /// Makes every write of the frame in progress final.
    pub fn finish_frame(&mut self) {
        for slot in self.slots.values_mut() {
            slot.before_frame = None;
        }
    }

    /// Rolls back the writes of an aborted frame. A retry of the same `FRAMEINDEX` must not see
    /// them: single-buffered targets become unreadable again, persistent buffers swap back to
    /// the content of the last completed frame.
    pub fn abort_frame(&mut self) {
        for (key, slot) in &mut self.slots {
            let Some(before) = slot.before_frame.take() else {
                continue;
            };
            if slot.persistent {
                if let Some(back) = slot.back.as_mut() {
                    std::mem::swap(&mut slot.front, back);
                }
                slot.written_frame = before;
            } else {
                slot.written_frame = None;
            }
            debug!(buffer = %key, "rolled back write of aborted frame");
        }
    }

    /// Records a failed write. A single-buffered target's content is undefined afterwards; a
    /// persistent buffer keeps its previous front.
    pub fn discard_write(&mut self, handle: &BufferHandle) {
        if let Some(slot) = self.slots.get_mut(&handle.key) {
            if !slot.persistent && slot.generation == handle.generation {
                slot.written_frame = None;
            }
        }
    }

    /// The presentable texture of a buffer.
    pub fn texture(&self, handle: &BufferHandle) -> Option<&T> {
        self.slot(handle).ok().map(|slot| &slot.front)
    }

    pub fn size(&self, key: &BufferKey) -> Option<Size> {
        self.slots.get(key).map(|slot| slot.size)
    }

    pub fn info(&self) -> Vec<BufferInfo> {
        self.slots
            .iter()
            .map(|(key, slot)| BufferInfo {
                key: key.clone(),
                size: slot.size,
                format: slot.format,
                persistent: slot.persistent,
                generation: slot.generation,
                written_frame: slot.written_frame,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, handle: &BufferHandle) -> Result<&BufferSlot<T>> {
        self.slots
            .get(&handle.key)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or_else(|| {
                EngineError::unknown_reference(handle.key.to_string(), "stale buffer handle")
            })
    }
}

fn handle_for(key: BufferKey, generation: u64) -> BufferHandle {
    BufferHandle { key, generation }
}
