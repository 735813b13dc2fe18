//! Growable descriptor set allocation.
//!
//! [`DescriptorAllocatorGrowable`] carves descriptor sets out of a chain of
//! pools that all share the ratio list given at construction. When the pool
//! serving an allocation runs out, it is parked in the "full" list, a fresh
//! (or previously reset) pool is taken and the allocation is retried once.
//! Each newly created pool is 1.5 times larger than the previous one, up to
//! [`MAX_SETS_PER_POOL`].
//!
//! Pools are reclaimed in bulk: [`clear_pools`](DescriptorAllocatorGrowable::clear_pools)
//! resets them all and makes them available again, which is how the frame
//! ring recycles per-frame descriptors.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_rhi::descriptor_allocator::{DescriptorAllocatorGrowable, PoolSizeRatio};
//! use ember_rhi::device::Device;
//! use ember_rhi::vk;
//!
//! # fn example(device: Arc<Device>, layout: vk::DescriptorSetLayout) -> ember_rhi::RhiResult<()> {
//! let ratios = [
//!     PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
//!     PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
//! ];
//! let mut allocator = DescriptorAllocatorGrowable::new(device, 1000, &ratios)?;
//!
//! let set = allocator.allocate(layout)?;
//! // ... write and bind `set` ...
//! allocator.clear_pools()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::backend::GpuDevice;
use crate::device::Device;
use crate::error::{RhiError, RhiResult, VkResultExt};

/// Upper bound on the set count of any single pool.
pub const MAX_SETS_PER_POOL: u32 = 4092;

/// Size multiplier applied to each successive pool.
pub const GROWTH_FACTOR: f64 = 1.5;

/// How many descriptors of one type a pool reserves per set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub const fn new(ty: vk::DescriptorType, ratio: f32) -> Self {
        Self { ty, ratio }
    }
}

/// Set count of the `index`-th pool (0-based) of an allocator started at `initial_sets`.
pub fn pool_size(initial_sets: u32, index: u32) -> u32 {
    let exponent = i32::try_from(index).unwrap_or(i32::MAX);
    let size = f64::from(initial_sets) * GROWTH_FACTOR.powi(exponent);
    size.min(f64::from(MAX_SETS_PER_POOL)) as u32
}

/// Whether `result` is one of the two codes that mean "this pool is used up".
#[inline]
pub fn is_pool_exhausted(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL
    )
}

/// Descriptor allocator that adds pools as it runs out of space.
pub struct DescriptorAllocatorGrowable<D: GpuDevice = Device> {
    device: Arc<D>,
    ratios: Vec<PoolSizeRatio>,
    ready_pools: Vec<vk::DescriptorPool>,
    full_pools: Vec<vk::DescriptorPool>,
    initial_sets: u32,
    pools_created: u32,
    destroyed: bool,
}

impl<D: GpuDevice> DescriptorAllocatorGrowable<D> {
    /// Creates the allocator and its first pool, sized for `initial_sets` sets.
    ///
    /// # Errors
    ///
    /// Returns an error if `initial_sets` is zero or pool creation fails.
    pub fn new(device: Arc<D>, initial_sets: u32, ratios: &[PoolSizeRatio]) -> RhiResult<Self> {
        if initial_sets == 0 {
            return Err(RhiError::InvalidHandle(
                "descriptor allocator needs at least one set per pool".to_string(),
            ));
        }

        let mut allocator = Self {
            device,
            ratios: ratios.to_vec(),
            ready_pools: Vec::new(),
            full_pools: Vec::new(),
            initial_sets: initial_sets.min(MAX_SETS_PER_POOL),
            pools_created: 0,
            destroyed: false,
        };

        let pool = allocator.create_pool()?;
        allocator.ready_pools.push(pool);
        Ok(allocator)
    }

    /// Allocates one descriptor set with `layout`.
    ///
    /// If the pool in use is exhausted or fragmented, it is marked full and
    /// the allocation is retried once against another pool.
    ///
    /// # Errors
    ///
    /// - [`RhiError::DescriptorPoolExhausted`] if the retry is exhausted too
    /// - [`RhiError::CallFailed`] for any other allocation failure
    /// - [`RhiError::AllocatorDestroyed`] after [`destroy_pools`](Self::destroy_pools)
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        if self.destroyed {
            return Err(RhiError::AllocatorDestroyed);
        }

        let pool = self.get_pool()?;
        match self.device.allocate_descriptor_set(pool, layout) {
            Ok(set) => {
                self.ready_pools.push(pool);
                return Ok(set);
            }
            Err(result) if is_pool_exhausted(result) => {
                debug!("Descriptor pool exhausted ({:?}), retrying", result);
                self.full_pools.push(pool);
            }
            Err(result) => {
                self.ready_pools.push(pool);
                return Err(result).call("vkAllocateDescriptorSets");
            }
        }

        let pool = self.get_pool()?;
        match self.device.allocate_descriptor_set(pool, layout) {
            Ok(set) => {
                self.ready_pools.push(pool);
                Ok(set)
            }
            Err(result) if is_pool_exhausted(result) => {
                self.full_pools.push(pool);
                Err(RhiError::DescriptorPoolExhausted {
                    watermark: self.watermark(),
                })
            }
            Err(result) => {
                self.ready_pools.push(pool);
                Err(result).call("vkAllocateDescriptorSets")
            }
        }
    }

    /// Resets every pool and returns the full ones to the ready list.
    ///
    /// Sets allocated before the call become invalid.
    pub fn clear_pools(&mut self) -> RhiResult<()> {
        for &pool in self.ready_pools.iter().chain(&self.full_pools) {
            self.device
                .reset_descriptor_pool(pool)
                .call("vkResetDescriptorPool")?;
        }
        self.ready_pools.append(&mut self.full_pools);
        Ok(())
    }

    /// Destroys every pool. Further allocations fail.
    pub fn destroy_pools(&mut self) {
        let count = self.ready_pools.len() + self.full_pools.len();
        for pool in self.ready_pools.drain(..).chain(self.full_pools.drain(..)) {
            self.device.destroy_descriptor_pool(pool);
        }
        if !self.destroyed {
            debug!("Destroyed {} descriptor pool(s)", count);
        }
        self.destroyed = true;
    }

    /// Set count of the most recently created pool.
    pub fn watermark(&self) -> u32 {
        pool_size(self.initial_sets, self.pools_created.saturating_sub(1))
    }

    /// Set count the next created pool will get.
    pub fn next_pool_size(&self) -> u32 {
        pool_size(self.initial_sets, self.pools_created)
    }

    #[inline]
    pub fn ratios(&self) -> &[PoolSizeRatio] {
        &self.ratios
    }

    #[inline]
    pub fn ready_pool_count(&self) -> usize {
        self.ready_pools.len()
    }

    #[inline]
    pub fn full_pool_count(&self) -> usize {
        self.full_pools.len()
    }

    /// Pops a ready pool, creating one at the next size if none is ready.
    fn get_pool(&mut self) -> RhiResult<vk::DescriptorPool> {
        match self.ready_pools.pop() {
            Some(pool) => Ok(pool),
            None => self.create_pool(),
        }
    }

    fn create_pool(&mut self) -> RhiResult<vk::DescriptorPool> {
        let max_sets = self.next_pool_size();
        let pool_sizes: Vec<vk::DescriptorPoolSize> = self
            .ratios
            .iter()
            .map(|r| {
                vk::DescriptorPoolSize::default()
                    .ty(r.ty)
                    .descriptor_count(((r.ratio * max_sets as f32) as u32).max(1))
            })
            .collect();

        let pool = self
            .device
            .create_descriptor_pool(max_sets, &pool_sizes)
            .call("vkCreateDescriptorPool")?;
        self.pools_created += 1;

        debug!(
            "Created descriptor pool #{} with {} sets (next: {})",
            self.pools_created,
            max_sets,
            self.next_pool_size()
        );
        Ok(pool)
    }
}

impl<D: GpuDevice> Drop for DescriptorAllocatorGrowable<D> {
    fn drop(&mut self) {
        if !self.destroyed {
            self.destroy_pools();
        }
    }
}

impl<D: GpuDevice> std::fmt::Debug for DescriptorAllocatorGrowable<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorAllocatorGrowable")
            .field("ready_pools", &self.ready_pools.len())
            .field("full_pools", &self.full_pools.len())
            .field("watermark", &self.watermark())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
