//! OpenCL-accelerated palette remapping.
//!
//! Optional drop-in replacement for the CPU resynthesis path. The device
//! context is process-wide state: lazily initialized behind a mutex,
//! idempotent to re-initialize, and explicitly released with
//! [`opencl_cleanup`]. Device output may differ from the CPU path by at
//! most one per channel, from reordering in the nearest-entry scan and
//! in residual rounding.
//!
//! Kernel launches are `unsafe` in the `ocl` crate (the driver runs
//! arbitrary device code over raw buffers), which is why this module
//! carries the crate's only `unsafe` blocks.

use crate::error::PtError;
use crate::remap::{LUT_BITS, LUT_DIM, LUT_MAX_PALETTE, LUT_SCALE, LUT_SHIFT, LUT_SIZE};
use crate::Point;

use log::{debug, error, warn};
use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::flags::MemFlags;
use ocl::{Buffer, Context, Device, DeviceType, Kernel, Platform, Program, Queue};
use once_cell::sync::Lazy;
use std::sync::Mutex;

const KERNEL_SRC: &str = include_str!("remap.cl");

/// Device work-group size; global sizes are rounded up to a multiple of
/// this and the kernels guard against the overhang.
const WORK_GROUP: usize = 256;

/// Streaming tiles target this many bytes per buffer.
const TILE_TARGET_BYTES: usize = 256 * 1024 * 1024;

/// Tile heights are rounded down to a multiple of this many rows.
const TILE_ROW_ALIGN: usize = 64;

struct GpuState {
    // Context owns the device resources; it is held so the queue,
    // program and buffers stay valid until cleanup.
    _context: Context,
    queue: Queue,
    program: Program,
    lut_buffer: Buffer<u16>,
    target_buffer: Option<Buffer<f32>>,
    source_buffer: Option<Buffer<f32>>,
    palette_len: usize,
    max_alloc_size: u64,
    device_name: String,
}

enum GpuContext {
    Uninitialized,
    Ready(Box<GpuState>),
    Failed,
}

static CONTEXT: Lazy<Mutex<GpuContext>> = Lazy::new(|| Mutex::new(GpuContext::Uninitialized));

fn lock_context() -> std::sync::MutexGuard<'static, GpuContext> {
    match CONTEXT.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Report whether any OpenCL platform is visible.
///
/// A pure probe: no context, queue, or buffer is created.
#[must_use]
pub fn opencl_available() -> bool {
    !Platform::list().is_empty()
}

fn device_info_u64(device: Device, info: DeviceInfo) -> u64 {
    match device.info(info) {
        Ok(DeviceInfoResult::MaxComputeUnits(v) | DeviceInfoResult::MaxClockFrequency(v)) => {
            u64::from(v)
        }
        Ok(DeviceInfoResult::GlobalMemSize(v) | DeviceInfoResult::MaxMemAllocSize(v)) => v,
        _ => 0,
    }
}

fn platform_cl_version(platform: Platform) -> u64 {
    let version = platform.version().unwrap_or_default();
    if version.contains("OpenCL 3.") {
        30
    } else if version.contains("OpenCL 2.") {
        20
    } else if version.contains("OpenCL 1.2") {
        12
    } else if version.contains("OpenCL 1.1") {
        11
    } else {
        10
    }
}

/// Pick the highest-scoring GPU across all platforms.
///
/// Score is `clVersion * 10^6 + compute_units * clock * global_mem_GB`,
/// preferring newer runtimes first and raw throughput second.
fn select_best_device() -> Option<(Platform, Device)> {
    let mut best: Option<(Platform, Device)> = None;
    let mut best_score = 0u64;

    for platform in Platform::list() {
        let cl_version = platform_cl_version(platform);
        let Ok(devices) = Device::list(platform, Some(DeviceType::GPU)) else {
            continue;
        };
        for device in devices {
            let compute_units = device_info_u64(device, DeviceInfo::MaxComputeUnits);
            let clock = device_info_u64(device, DeviceInfo::MaxClockFrequency);
            let mem_gb = device_info_u64(device, DeviceInfo::GlobalMemSize) >> 30;
            let score = cl_version * 1_000_000 + compute_units * clock * mem_gb;
            if score > best_score {
                best_score = score;
                best = Some((platform, device));
            }
        }
    }

    best
}

fn init_state() -> Result<Box<GpuState>, PtError> {
    let Some((platform, device)) = select_best_device() else {
        return Err(PtError::DeviceUnavailable(
            "no GPU device on any platform".into(),
        ));
    };

    let context = Context::builder()
        .platform(platform)
        .devices(device)
        .build()?;
    let queue = Queue::new(&context, device, None)?;
    let program = match Program::builder().src(KERNEL_SRC).devices(device).build(&context) {
        Ok(program) => program,
        Err(e) => {
            error!("OpenCL kernel build failed: {e}");
            return Err(PtError::DeviceUnavailable(e.to_string()));
        }
    };

    let lut_buffer = Buffer::<u16>::builder()
        .queue(queue.clone())
        .flags(MemFlags::new().read_write())
        .len(LUT_SIZE)
        .build()?;

    let device_name = device.name().unwrap_or_else(|_| "unnamed GPU".to_string());
    let max_alloc_size = device_info_u64(device, DeviceInfo::MaxMemAllocSize);
    debug!(
        "OpenCL initialized: {device_name}, max alloc {:.1} GiB",
        max_alloc_size as f64 / f64::from(1u32 << 30)
    );

    Ok(Box::new(GpuState {
        _context: context,
        queue,
        program,
        lut_buffer,
        target_buffer: None,
        source_buffer: None,
        palette_len: 0,
        max_alloc_size,
        device_name,
    }))
}

/// Initialize the process-wide device context.
///
/// Idempotent once ready; a failed attempt may be retried. Returns
/// [`PtError::DeviceUnavailable`] when no device can be brought up.
pub fn opencl_init() -> Result<(), PtError> {
    let mut guard = lock_context();
    match &*guard {
        GpuContext::Ready(_) => Ok(()),
        GpuContext::Uninitialized | GpuContext::Failed => match init_state() {
            Ok(state) => {
                *guard = GpuContext::Ready(state);
                Ok(())
            }
            Err(e) => {
                warn!("OpenCL initialization failed: {e}");
                *guard = GpuContext::Failed;
                Err(e)
            }
        },
    }
}

/// Release every device object and return to the uninitialized state.
pub fn opencl_cleanup() {
    let mut guard = lock_context();
    *guard = GpuContext::Uninitialized;
}

/// Name of the selected device, once initialized.
#[must_use]
pub fn opencl_device_name() -> Option<String> {
    match &*lock_context() {
        GpuContext::Ready(state) => Some(state.device_name.clone()),
        GpuContext::Uninitialized | GpuContext::Failed => None,
    }
}

fn flatten_palette(palette: &[Point]) -> Vec<f32> {
    let mut flat = Vec::with_capacity(palette.len() * 3);
    for p in palette {
        flat.push(p.c1);
        flat.push(p.c2);
        flat.push(p.c3);
    }
    flat
}

impl GpuState {
    /// (Re)create the palette buffers when the palette size changes.
    fn ensure_palette_buffers(&mut self, len: usize) -> Result<(), PtError> {
        if self.palette_len == len && self.target_buffer.is_some() {
            return Ok(());
        }
        let build = || {
            Buffer::<f32>::builder()
                .queue(self.queue.clone())
                .flags(MemFlags::new().read_only())
                .len(len * 3)
                .build()
        };
        self.target_buffer = Some(build()?);
        self.source_buffer = Some(build()?);
        self.palette_len = len;
        Ok(())
    }

    /// Upload the target palette, recreating the buffers on a size
    /// change.
    fn upload_target(&mut self, target_palette: &[Point]) -> Result<(), PtError> {
        self.ensure_palette_buffers(target_palette.len())?;
        let target = self.target_buffer.as_ref().ok_or(PtError::General(
            "palette buffer missing after initialization",
        ))?;
        target.write(&flatten_palette(target_palette)).enq()?;
        Ok(())
    }

    /// Upload the source palette; [`Self::upload_target`] must have
    /// sized the buffers first.
    fn upload_source(&self, source_palette: &[Point]) -> Result<(), PtError> {
        let source = self
            .source_buffer
            .as_ref()
            .ok_or(PtError::General("source palette buffer not uploaded"))?;
        source.write(&flatten_palette(source_palette)).enq()?;
        Ok(())
    }

    /// Rebuild the device LUT from the already-uploaded target palette.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn build_lut_device(&self, palette_len: usize) -> Result<(), PtError> {
        let target = self
            .target_buffer
            .as_ref()
            .ok_or(PtError::General("target palette buffer not uploaded"))?;

        let global = LUT_SIZE.div_ceil(WORK_GROUP) * WORK_GROUP;
        let kernel = Kernel::builder()
            .program(&self.program)
            .name("build_palette_lut")
            .queue(self.queue.clone())
            .global_work_size(global)
            .local_work_size(WORK_GROUP)
            .arg(target)
            .arg(palette_len as i32)
            .arg(&self.lut_buffer)
            .arg(LUT_DIM as i32)
            .arg(LUT_SCALE)
            .build()?;
        #[allow(unsafe_code)]
        unsafe {
            kernel.enq()?;
        }
        Ok(())
    }

    /// Enqueue the remap kernel for one tile.
    ///
    /// Palettes within [`LUT_MAX_PALETTE`] go through the device LUT;
    /// larger palettes dispatch the direct per-pixel scan, mirroring the
    /// CPU path so the two stay within the one-per-channel contract.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn enqueue_remap_tile(
        &self,
        input: &Buffer<u32>,
        output: &Buffer<u32>,
        width: usize,
        rows: usize,
        palette_len: usize,
    ) -> Result<(), PtError> {
        let target = self
            .target_buffer
            .as_ref()
            .ok_or(PtError::General("target palette buffer not uploaded"))?;
        let source = self
            .source_buffer
            .as_ref()
            .ok_or(PtError::General("source palette buffer not uploaded"))?;

        let pixels = width * rows;
        let global = pixels.div_ceil(WORK_GROUP) * WORK_GROUP;
        let kernel = if palette_len <= LUT_MAX_PALETTE {
            Kernel::builder()
                .program(&self.program)
                .name("resynthesize_lut")
                .queue(self.queue.clone())
                .global_work_size(global)
                .local_work_size(WORK_GROUP)
                .arg(input)
                .arg(output)
                .arg(&self.lut_buffer)
                .arg(target)
                .arg(source)
                .arg(width as i32)
                .arg(rows as i32)
                .arg(LUT_BITS as i32)
                .arg(LUT_SHIFT as i32)
                .build()?
        } else {
            Kernel::builder()
                .program(&self.program)
                .name("resynthesize_direct")
                .queue(self.queue.clone())
                .global_work_size(global)
                .local_work_size(WORK_GROUP)
                .arg(input)
                .arg(output)
                .arg(target)
                .arg(source)
                .arg(palette_len as i32)
                .arg(width as i32)
                .arg(rows as i32)
                .build()?
        };
        #[allow(unsafe_code)]
        unsafe {
            kernel.enq()?;
        }
        Ok(())
    }
}

fn validate_remap(
    pixels: &[u32],
    width: usize,
    height: usize,
    target_palette: &[Point],
    source_palette: &[Point],
) -> Result<(), PtError> {
    if target_palette.len() != source_palette.len() {
        return Err(PtError::MismatchedPalettes);
    }
    if target_palette.is_empty() {
        return Err(PtError::EmptyPalette);
    }
    if target_palette.len() > usize::from(u16::MAX) {
        return Err(PtError::PaletteTooLarge);
    }
    if width.checked_mul(height) != Some(pixels.len()) {
        return Err(PtError::MismatchedPixelBuffer);
    }
    Ok(())
}

fn ready_state(guard: &mut GpuContext) -> Result<&mut GpuState, PtError> {
    if matches!(guard, GpuContext::Uninitialized | GpuContext::Failed) {
        match init_state() {
            Ok(state) => *guard = GpuContext::Ready(state),
            Err(e) => {
                *guard = GpuContext::Failed;
                return Err(e);
            }
        }
    }
    match guard {
        GpuContext::Ready(state) => Ok(state.as_mut()),
        GpuContext::Uninitialized | GpuContext::Failed => {
            Err(PtError::DeviceUnavailable("initialization failed".into()))
        }
    }
}

/// Resynthesize an image on the device in a single pass.
///
/// Falls back to the tiled streaming path when the combined allocations
/// would exceed the device's maximum single allocation. Initializes the
/// context on first use.
pub fn opencl_resynthesize_image(
    pixels: &[u32],
    width: usize,
    height: usize,
    target_palette: &[Point],
    source_palette: &[Point],
) -> Result<Vec<u32>, PtError> {
    validate_remap(pixels, width, height, target_palette, source_palette)?;

    let mut guard = lock_context();
    let state = ready_state(&mut guard)?;

    let image_bytes = pixels.len() as u64 * 4;
    let palette_bytes = target_palette.len() as u64 * 3 * 4;
    let lut_bytes = LUT_SIZE as u64 * 2;
    if image_bytes * 2 + palette_bytes * 2 + lut_bytes > state.max_alloc_size {
        return stream_tiles(state, pixels, width, height, target_palette, source_palette, 0);
    }

    state.upload_target(target_palette)?;
    state.upload_source(source_palette)?;
    if target_palette.len() <= LUT_MAX_PALETTE {
        state.build_lut_device(target_palette.len())?;
    }

    let input = Buffer::<u32>::builder()
        .queue(state.queue.clone())
        .flags(MemFlags::new().read_only().copy_host_ptr())
        .len(pixels.len())
        .copy_host_slice(pixels)
        .build()?;
    let output = Buffer::<u32>::builder()
        .queue(state.queue.clone())
        .flags(MemFlags::new().write_only())
        .len(pixels.len())
        .build()?;

    state.enqueue_remap_tile(&input, &output, width, height, target_palette.len())?;

    let mut result = vec![0u32; pixels.len()];
    output.read(&mut result).enq()?;
    Ok(result)
}

/// Resynthesize an image on the device in row-tile slabs bounded by
/// ~256 MiB each, alternating between two buffer pairs.
///
/// `tile_height` of `0` picks the automatic height: the target byte
/// budget divided across two buffers, rounded down to a multiple of 64
/// rows and clamped into `[64, height]`.
pub fn opencl_resynthesize_streaming(
    pixels: &[u32],
    width: usize,
    height: usize,
    target_palette: &[Point],
    source_palette: &[Point],
    tile_height: usize,
) -> Result<Vec<u32>, PtError> {
    validate_remap(pixels, width, height, target_palette, source_palette)?;

    let mut guard = lock_context();
    let state = ready_state(&mut guard)?;
    stream_tiles(
        state,
        pixels,
        width,
        height,
        target_palette,
        source_palette,
        tile_height,
    )
}

fn auto_tile_height(width: usize, height: usize) -> usize {
    let bytes_per_row = width * 4;
    if bytes_per_row == 0 {
        return height.max(1);
    }
    let mut tile = TILE_TARGET_BYTES / bytes_per_row / 2;
    tile = tile.max(TILE_ROW_ALIGN).min(height);
    tile = tile / TILE_ROW_ALIGN * TILE_ROW_ALIGN;
    if tile == 0 { height } else { tile }
}

fn stream_tiles(
    state: &mut GpuState,
    pixels: &[u32],
    width: usize,
    height: usize,
    target_palette: &[Point],
    source_palette: &[Point],
    tile_height: usize,
) -> Result<Vec<u32>, PtError> {
    let tile_height = if tile_height == 0 {
        auto_tile_height(width, height)
    } else {
        tile_height.min(height.max(1))
    };

    state.upload_target(target_palette)?;
    state.upload_source(source_palette)?;
    if target_palette.len() <= LUT_MAX_PALETTE {
        state.build_lut_device(target_palette.len())?;
    }

    let tile_pixels = (width * tile_height).max(1);
    let build_pair = |flags: MemFlags| {
        Buffer::<u32>::builder()
            .queue(state.queue.clone())
            .flags(flags)
            .len(tile_pixels)
            .build()
    };
    // Two input and two output buffers; a failure from here on drops
    // all four on return.
    let inputs = [
        build_pair(MemFlags::new().read_only())?,
        build_pair(MemFlags::new().read_only())?,
    ];
    let outputs = [
        build_pair(MemFlags::new().write_only())?,
        build_pair(MemFlags::new().write_only())?,
    ];

    let mut result = vec![0u32; pixels.len()];
    let mut pending: Option<(usize, &mut [u32])> = None;

    for (tile, (chunk_in, chunk_out)) in pixels
        .chunks(tile_pixels)
        .zip(result.chunks_mut(tile_pixels))
        .enumerate()
    {
        let slot = tile % 2;
        let rows = chunk_in.len() / width.max(1);

        inputs[slot].write(chunk_in).enq()?;
        state.enqueue_remap_tile(
            &inputs[slot],
            &outputs[slot],
            width,
            rows,
            target_palette.len(),
        )?;

        // Drain the previous tile while this one is in flight; the
        // in-order queue sequences the read after its kernel.
        if let Some((prev_slot, prev_chunk)) = pending.take() {
            outputs[prev_slot].read(prev_chunk).enq()?;
        }
        pending = Some((slot, chunk_out));
    }

    if let Some((slot, chunk)) = pending.take() {
        outputs[slot].read(chunk).enq()?;
    }
    state.queue.finish()?;

    Ok(result)
}

/// Build the palette LUT on the device and read it back.
///
/// Exists so hosts (and tests) can compare device and CPU tables; the
/// dimensions are fixed at the crate's LUT shape.
pub fn opencl_build_lut(target_palette: &[Point]) -> Result<Vec<u16>, PtError> {
    if target_palette.is_empty() {
        return Err(PtError::EmptyPalette);
    }
    if target_palette.len() > usize::from(u16::MAX) {
        return Err(PtError::PaletteTooLarge);
    }

    let mut guard = lock_context();
    let state = ready_state(&mut guard)?;
    state.upload_target(target_palette)?;
    state.build_lut_device(target_palette.len())?;

    let mut lut = vec![0u16; LUT_SIZE];
    state.lut_buffer.read(&mut lut).enq()?;
    Ok(lut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remap::resynthesize_image;
    use crate::rng::XorShift64;

    // One combined test: the context is process-wide, so independent
    // tests would race each other's init/cleanup.
    #[test]
    fn device_path_agrees_with_cpu_when_available() {
        if !opencl_available() || opencl_init().is_err() {
            // No usable device in this environment; the CPU paths are
            // covered elsewhere.
            return;
        }

        let mut rng = XorShift64::new(5);
        #[allow(clippy::cast_possible_truncation)]
        let pixels: Vec<u32> = (0..256 * 192)
            .map(|_| (rng.next_u64() & 0x00FF_FFFF) as u32)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let target: Vec<Point> = (0..17)
            .map(|i: usize| {
                Point::new((i * 15 + 4) as f32, ((i * 37) % 256) as f32, ((i * 61) % 256) as f32)
            })
            .collect();
        let source: Vec<Point> = target
            .iter()
            .map(|&p| Point::new(p.c3, p.c1, p.c2))
            .collect();

        let cpu = resynthesize_image(&pixels, 256, 192, &target, &source).unwrap();
        let gpu = opencl_resynthesize_image(&pixels, 256, 192, &target, &source).unwrap();
        let streamed =
            opencl_resynthesize_streaming(&pixels, 256, 192, &target, &source, 64).unwrap();

        for (&c, &g) in cpu.iter().zip(&gpu) {
            for shift in [16u32, 8, 0] {
                let cc = i32::try_from((c >> shift) & 0xFF).unwrap();
                let gc = i32::try_from((g >> shift) & 0xFF).unwrap();
                assert!((cc - gc).abs() <= 1, "cpu {c:08x} gpu {g:08x}");
            }
        }
        for (&g, &s) in gpu.iter().zip(&streamed) {
            for shift in [16u32, 8, 0] {
                let gc = i32::try_from((g >> shift) & 0xFF).unwrap();
                let sc = i32::try_from((s >> shift) & 0xFF).unwrap();
                assert!((gc - sc).abs() <= 1, "single {g:08x} streamed {s:08x}");
            }
        }

        let lut = opencl_build_lut(&target).unwrap();
        assert_eq!(lut.len(), LUT_SIZE);
        assert!(lut.iter().all(|&i| usize::from(i) < target.len()));

        // Above the LUT threshold both paths scan directly; with the
        // palettes identical the image must round-trip on either side.
        let mut rng = XorShift64::new(23);
        #[allow(clippy::cast_precision_loss)]
        let big: Vec<Point> = (0..LUT_MAX_PALETTE + 1)
            .map(|_| {
                Point::new(
                    rng.next_below(256) as f32,
                    rng.next_below(256) as f32,
                    rng.next_below(256) as f32,
                )
            })
            .collect();
        let cpu_big = resynthesize_image(&pixels, 256, 192, &big, &big).unwrap();
        let gpu_big = opencl_resynthesize_image(&pixels, 256, 192, &big, &big).unwrap();
        for (&c, &g) in cpu_big.iter().zip(&gpu_big) {
            for shift in [16u32, 8, 0] {
                let cc = i32::try_from((c >> shift) & 0xFF).unwrap();
                let gc = i32::try_from((g >> shift) & 0xFF).unwrap();
                assert!((cc - gc).abs() <= 1, "cpu {c:08x} gpu {g:08x} above threshold");
            }
        }

        opencl_cleanup();
        assert!(opencl_device_name().is_none());
    }
}
