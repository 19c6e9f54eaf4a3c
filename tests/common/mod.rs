//! Common test utilities: logger setup and host runtime fixtures

#![allow(dead_code)]

use harp_dispatch::backend::{HostApi, HostDevice, HostPlatform};
use harp_dispatch::{DeviceKind, Engine, EngineConfig};

pub const EPSILON: f32 = 1e-5;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

pub const ADD_SOURCE: &str = r#"
__kernel void add_kernel(__global const float *a,
                         __global const float *b,
                         __global float *c,
                         const int n)
{
    int i = get_global_id(0);
    if (i < n) {
        c[i] = a[i] + b[i];
    }
}
"#;

pub const COPY_SOURCE: &str = r#"
__kernel void copy_kernel(__global const float *src, __global float *dst, const int n)
{
    int i = get_global_id(0);
    if (i < n) {
        dst[i] = src[i];
    }
}
"#;

pub const IMAGE_SOURCE: &str = r#"
__constant sampler_t smp = CLK_NORMALIZED_COORDS_FALSE | CLK_ADDRESS_CLAMP_TO_EDGE | CLK_FILTER_NEAREST;

__kernel void img_3x3_avg(__read_only image2d_t src,
                          __write_only image2d_t dst,
                          const int width,
                          const int height)
{
    int x = get_global_id(0);
    int y = get_global_id(1);
    if (x >= width || y >= height) {
        return;
    }
    float sum = 0.0f;
    for (int dy = -1; dy <= 1; dy++) {
        for (int dx = -1; dx <= 1; dx++) {
            sum += read_imagef(src, smp, (int2)(x + dx, y + dy)).x;
        }
    }
    write_imagef(dst, (int2)(x, y), (float4)(sum / 9.0f));
}
"#;

/// Host runtime with implementations of every fixture kernel.
pub fn host_api() -> HostApi {
    HostApi::new()
        .with_kernel("add_kernel", |item| {
            let i = item.global_id(0);
            let n: i32 = item.arg(3)?;
            if (i as i32) < n {
                let a: f32 = item.load(0, i)?;
                let b: f32 = item.load(1, i)?;
                item.store(2, i, a + b)?;
            }
            Ok(())
        })
        .with_kernel("copy_kernel", |item| {
            let i = item.global_id(0);
            let n: i32 = item.arg(2)?;
            if (i as i32) < n {
                let v: f32 = item.load(0, i)?;
                item.store(1, i, v)?;
            }
            Ok(())
        })
        .with_kernel("img_3x3_avg", |item| {
            let (x, y) = (item.global_id(0), item.global_id(1));
            let width: i32 = item.arg(2)?;
            let height: i32 = item.arg(3)?;
            if x as i32 >= width || y as i32 >= height {
                return Ok(());
            }
            let mut sum = 0.0f32;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    sum += item.read_imagef(0, x as i64 + dx, y as i64 + dy)?;
                }
            }
            item.write_imagef(1, x, y, sum / 9.0)
        })
}

/// One CPU-only platform.
pub fn cpu_host() -> HostApi {
    host_api().with_platform(HostPlatform::new("Portable Host", "pocl").with_device(HostDevice::cpu(
        "host-cpu",
        3000,
        16,
    )))
}

/// Three platforms: an Intel CPU+GPU, an empty one and an NVIDIA GPU.
pub fn mixed_host() -> HostApi {
    host_api()
        .with_platform(
            HostPlatform::new("Intel(R) OpenCL", "Intel(R) Corporation")
                .with_device(HostDevice::new("Xeon", "Intel(R) Corporation", DeviceKind::Cpu, 2400, 32))
                .with_device(HostDevice::gpu("Iris Xe", "Intel(R) Corporation", 1300, 96)),
        )
        .with_platform(HostPlatform::new("Empty", "nobody"))
        .with_platform(
            HostPlatform::new("NVIDIA CUDA", "NVIDIA Corporation")
                .with_device(HostDevice::gpu("GeForce RTX", "NVIDIA Corporation", 1700, 46)),
        )
}

/// CPU engine over `cpu_host` with the given block size and all fixture sources built.
pub fn cpu_engine(block_size: usize) -> Engine<HostApi> {
    init_logger();
    let config = EngineConfig::builder()
        .device_kind(DeviceKind::Cpu)
        .block_size(block_size)
        .build();
    let mut engine = Engine::new(cpu_host(), config).unwrap();
    engine
        .add_source(&[ADD_SOURCE, COPY_SOURCE, IMAGE_SOURCE].concat())
        .unwrap();
    engine
}
