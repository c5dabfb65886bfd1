//! Fixed-capacity frame buffer pool.

use crate::frame::{Frame, PoolLease};
use image::RgbaImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

struct PoolState {
    width: u32,
    height: u32,
    /// Bumped by `clear` so older leases are ignored.
    generation: u64,
    /// Free buffers parked in their slot; `None` while leased or not yet allocated.
    buffers: Vec<Option<RgbaImage>>,
    in_use: Vec<bool>,
}

/// Pool of same-size frame buffers with an in-use bitmap.
///
/// When every slot is leased, [`acquire`](FramePool::acquire) hands out an
/// unpooled frame instead of failing. Releasing a frame that did not come
/// from this pool simply drops it.
pub struct FramePool {
    id: u64,
    state: Mutex<PoolState>,
}

impl FramePool {
    pub fn new(capacity: usize, width: u32, height: u32) -> Self {
        let buffers = (0..capacity)
            .map(|_| Some(RgbaImage::new(width, height)))
            .collect();
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(PoolState {
                width,
                height,
                generation: 0,
                buffers,
                in_use: vec![false; capacity],
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Bookkeeping stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.lock().in_use.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.lock().in_use.iter().filter(|u| **u).count()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let state = self.lock();
        (state.width, state.height)
    }

    /// Change the buffer size. Parked buffers are reallocated on next acquire.
    pub fn set_dimensions(&self, width: u32, height: u32) {
        let mut state = self.lock();
        state.width = width;
        state.height = height;
    }

    /// Take a free buffer, or an unpooled one if the pool is exhausted.
    pub fn acquire(&self) -> Frame {
        let mut state = self.lock();
        let (width, height) = (state.width, state.height);

        let Some(slot) = state.in_use.iter().position(|u| !*u) else {
            log::debug!("Frame pool exhausted, allocating unpooled {}x{}", width, height);
            return Frame::new(width, height);
        };

        state.in_use[slot] = true;
        let image = match state.buffers[slot].take() {
            Some(img) if img.dimensions() == (width, height) => img,
            _ => RgbaImage::new(width, height),
        };
        Frame::from_pool(
            image,
            PoolLease {
                pool_id: self.id,
                generation: state.generation,
                slot,
            },
        )
    }

    /// Return a frame. Pool members are cleared and parked; anything else is dropped.
    pub fn release(&self, mut frame: Frame) {
        let Some(lease) = frame.lease().filter(|l| l.pool_id == self.id) else {
            return;
        };

        let mut state = self.lock();
        if lease.generation != state.generation {
            return;
        }
        if lease.slot >= state.in_use.len() || !state.in_use[lease.slot] {
            log::warn!("Ignoring release of unleased pool slot {}", lease.slot);
            return;
        }

        frame.clear();
        state.buffers[lease.slot] = Some(frame.into_image());
        state.in_use[lease.slot] = false;
    }

    /// Drop every parked buffer and forget outstanding leases.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.buffers.iter_mut().for_each(|b| *b = None);
        state.in_use.iter_mut().for_each(|u| *u = false);
        state.generation += 1;
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FramePool")
            .field("capacity", &state.in_use.len())
            .field("width", &state.width)
            .field("height", &state.height)
            .finish()
    }
}
