//! Program builds, argument binding, transfers and launches on the host runtime

mod common;

use common::{ADD_SOURCE, COPY_SOURCE, cpu_engine, cpu_host, init_logger, mixed_host};
use harp_dispatch::{DeviceKind, DispatchError, Engine, EngineConfig, MemAccess, args};
use rstest::rstest;

#[test]
fn test_add_kernel() {
    let engine = cpu_engine(8);
    let n = 20usize;
    let mut a = vec![1.0f32; n];
    let mut b = vec![2.0f32; n];
    let mut c = vec![0.0f32; n];

    {
        let mut session = engine.session("add_kernel").unwrap();
        session.bind_buffer("a", &mut a, MemAccess::ReadOnly).unwrap();
        session.bind_buffer("b", &mut b, MemAccess::ReadOnly).unwrap();
        session.bind_buffer("c", &mut c, MemAccess::WriteOnly).unwrap();
        session.bind_argument(n as i32).unwrap();

        session.write_buffer("a").unwrap();
        session.write_buffer("b").unwrap();
        session.execute(n).unwrap();
        session.read_buffer("c").unwrap();
    }

    assert!(c.iter().all(|&v| v == 3.0), "{:?}", c);
}

#[test]
fn test_copy_round_trip_is_bit_exact() {
    let engine = cpu_engine(16);
    let mut src = vec![
        0.0f32,
        -0.0,
        1.0e-40,
        f32::MIN_POSITIVE,
        f32::MAX,
        f32::NEG_INFINITY,
        f32::from_bits(0x7fc0_1234),
        std::f32::consts::PI,
    ];
    let mut dst = vec![0.0f32; src.len()];
    let expected: Vec<u32> = src.iter().map(|v| v.to_bits()).collect();

    {
        let mut session = engine.session("copy_kernel").unwrap();
        session.bind_buffer_rw("src", &mut src).unwrap();
        session.bind_buffer_rw("dst", &mut dst).unwrap();
        session.bind_arguments(args![8i32]).unwrap();
        session.write_buffer("src").unwrap();
        session.execute(8).unwrap();
        session.read_buffer("dst").unwrap();
    }

    let actual: Vec<u32> = dst.iter().map(|v| v.to_bits()).collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_buffers_are_not_copied_until_written() {
    let engine = cpu_engine(4);
    let mut src = vec![5.0f32; 4];
    let mut dst = vec![9.0f32; 4];

    {
        let mut session = engine.session("copy_kernel").unwrap();
        session.bind_buffer_rw("src", &mut src).unwrap();
        session.bind_buffer_rw("dst", &mut dst).unwrap();
        session.bind_argument(4i32).unwrap();
        // no write_buffer: the device copy of `src` is still zeroed
        session.execute(4).unwrap();
        session.read_buffer("dst").unwrap();
    }

    assert_eq!(dst, vec![0.0; 4]);
}

#[test]
fn test_unknown_ids_are_skipped() {
    let engine = cpu_engine(4);
    let mut data = vec![1.5f32; 4];

    {
        let mut session = engine.session("copy_kernel").unwrap();
        session.bind_buffer_rw("src", &mut data).unwrap();

        session.write_buffer("missing").unwrap();
        session.read_buffer("missing").unwrap();
        session.write_image("missing").unwrap();
        // bound, but as a buffer
        session.read_image("src").unwrap();
        assert!(session.is_bound("src"));
        assert!(!session.is_bound("missing"));
    }

    assert_eq!(data, vec![1.5; 4]);
    assert_eq!(engine.api().stats().transfers(), 0);
}

#[test]
fn test_empty_build_is_noop() {
    init_logger();
    let config = EngineConfig::builder().device_kind(DeviceKind::Cpu).build();
    let mut engine = Engine::new(cpu_host(), config).unwrap();

    engine.build().unwrap();
    engine.add_source("").unwrap();

    assert!(engine.program().is_none());
    assert_eq!(engine.api().stats().builds(), 0);
    assert!(matches!(
        engine.session("add_kernel").err().unwrap(),
        DispatchError::ProgramNotBuilt
    ));
}

#[rstest]
#[case(11, 8, 16)]
#[case(16, 8, 16)]
#[case(1, 32, 32)]
#[case(33, 32, 64)]
fn test_launch_rounds_to_blocks(#[case] n: usize, #[case] block: usize, #[case] launched: usize) {
    let engine = cpu_engine(block);
    let mut a = vec![1.0f32; n];
    let mut b = vec![1.0f32; n];
    let mut c = vec![0.0f32; n];

    {
        let mut session = engine.session("add_kernel").unwrap();
        session.bind_buffer_rw("a", &mut a).unwrap();
        session.bind_buffer_rw("b", &mut b).unwrap();
        session.bind_buffer_rw("c", &mut c).unwrap();
        session.bind_argument(n as i32).unwrap();
        session.write_buffer("a").unwrap();
        session.write_buffer("b").unwrap();
        session.execute(n).unwrap();
        session.read_buffer("c").unwrap();
    }

    let stats = engine.api().stats();
    assert_eq!(stats.launches(), 1);
    assert_eq!(stats.work_items(), launched);
    assert!(c.iter().all(|&v| v == 2.0));
}

#[test]
fn test_zero_range_skips_launch() {
    let engine = cpu_engine(8);
    let mut session = engine.session("add_kernel").unwrap();
    // arguments deliberately left unset: nothing is enqueued
    session.execute(0).unwrap();
    session.execute_2d([0, 4]).unwrap();
    drop(session);
    assert_eq!(engine.api().stats().launches(), 0);
}

#[test]
fn test_oversized_range_is_rejected() {
    let engine = cpu_engine(8);
    let mut session = engine.session("add_kernel").unwrap();
    for err in [
        session.execute(usize::MAX - 2).err().unwrap(),
        session.execute_timed(usize::MAX - 2).err().unwrap(),
        session.execute_2d([usize::MAX - 2, 1]).err().unwrap(),
        session.execute_2d([1 << 40, 1 << 40]).err().unwrap(),
    ] {
        match err {
            DispatchError::NativeApi { operation, message } => {
                assert_eq!(operation, "clEnqueueNDRangeKernel");
                assert_eq!(message, "CL_INVALID_GLOBAL_WORK_SIZE");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
    drop(session);
    assert_eq!(engine.api().stats().launches(), 0);
}

#[test]
fn test_unset_arguments_fail_at_launch() {
    let engine = cpu_engine(8);
    let mut session = engine.session("add_kernel").unwrap();
    session.bind_argument(0i32).unwrap();
    let err = session.execute(8).err().unwrap();
    assert!(matches!(err, DispatchError::NativeApi { .. }), "{}", err);
}

#[test]
fn test_argument_slots() {
    let engine = cpu_engine(8);
    let mut a = vec![0.0f32; 2];
    let mut session = engine.session("add_kernel").unwrap();
    assert_eq!(session.arg_count(), 4);

    // explicit slot leaves the cursor alone
    session.set_argument(3, 2i32).unwrap();
    assert_eq!(session.argument_cursor(), 0);

    session.bind_buffer_rw("a", &mut a).unwrap();
    session.bind_arguments(args![1.0f32, 2.0f32, 3i32]).unwrap();
    assert_eq!(session.argument_cursor(), 4);

    let err = session.bind_argument(7i32).err().unwrap();
    assert!(matches!(
        err,
        DispatchError::ArgumentSlotOutOfRange { slot: 4, count: 4 }
    ));
    assert!(session.set_argument(9, 1u8).is_err());
    assert_eq!(session.argument_cursor(), 4);

    session.reset_argument_cursor();
    assert_eq!(session.argument_cursor(), 0);
}

#[test]
fn test_rebinding_replaces_allocation() {
    let engine = cpu_engine(4);
    let mut first = vec![1.0f32; 4];
    let mut second = vec![2.0f32; 4];
    let mut dst = vec![0.0f32; 4];

    {
        let mut session = engine.session("copy_kernel").unwrap();
        session.bind_buffer_rw("src", &mut first).unwrap();
        session.reset_argument_cursor();
        session.bind_buffer_rw("src", &mut second).unwrap();
        session.bind_buffer_rw("dst", &mut dst).unwrap();
        session.bind_argument(4i32).unwrap();
        session.write_buffer("src").unwrap();
        session.execute(4).unwrap();
        session.read_buffer("dst").unwrap();
    }

    assert_eq!(dst, vec![2.0; 4]);
}

#[test]
fn test_kernel_not_found_lists_available() {
    let engine = cpu_engine(8);
    match engine.session("mul_kernel").err().unwrap() {
        DispatchError::KernelNotFound { name, available } => {
            assert_eq!(name, "mul_kernel");
            assert_eq!(available, vec!["add_kernel", "copy_kernel", "img_3x3_avg"]);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_program_goes_stale_until_rebuilt() {
    init_logger();
    let config = EngineConfig::builder().device_kind(DeviceKind::Gpu).block_size(8).build();
    let mut engine = Engine::new(mixed_host(), config).unwrap();
    engine.add_source(ADD_SOURCE).unwrap();
    assert!(engine.session("add_kernel").is_ok());

    // more source rebuilds in place
    engine.add_source(COPY_SOURCE).unwrap();
    assert!(engine.is_program_current());
    assert!(engine.session("copy_kernel").is_ok());

    // so does another block size
    engine.set_block_size(16).unwrap();
    assert!(engine.is_program_current());
    assert_eq!(engine.session("add_kernel").unwrap().block_size(), 16);
    assert_eq!(engine.api().stats().last_options(), "-DBLOCK_SIZE=16");

    // another device does not
    engine.select(0).unwrap();
    assert!(matches!(engine.session("add_kernel").err().unwrap(), DispatchError::StaleProgram));
    engine.build().unwrap();
    assert!(engine.is_program_current());

    // a failed selection changes nothing
    assert!(engine.select(1).is_err());
    assert!(engine.is_program_current());

    assert_eq!(engine.api().stats().builds(), 4);
}

#[test]
fn test_build_is_idempotent() {
    let mut engine = cpu_engine(8);
    engine.build().unwrap();
    engine.build().unwrap();
    engine.set_block_size(8).unwrap();
    engine.add_source("").unwrap();
    assert_eq!(engine.api().stats().builds(), 1);
}

#[test]
fn test_add_source_then_execute_without_build() {
    init_logger();
    let config = EngineConfig::builder().device_kind(DeviceKind::Cpu).block_size(8).build();
    let mut engine = Engine::new(cpu_host(), config).unwrap();
    engine.add_source(ADD_SOURCE).unwrap();

    let n = 20usize;
    let mut a = vec![1.0f32; n];
    let mut b = vec![2.0f32; n];
    let mut c = vec![0.0f32; n];
    {
        let mut session = engine.session("add_kernel").unwrap();
        session.bind_buffer("a", &mut a, MemAccess::ReadOnly).unwrap();
        session.bind_buffer("b", &mut b, MemAccess::ReadOnly).unwrap();
        session.bind_buffer("c", &mut c, MemAccess::WriteOnly).unwrap();
        session.bind_argument(n as i32).unwrap();
        session.write_buffer("a").unwrap();
        session.write_buffer("b").unwrap();
        session.execute(n).unwrap();
        session.read_buffer("c").unwrap();
    }
    assert!(c.iter().all(|&v| v == 3.0), "{:?}", c);

    engine.set_block_size(4).unwrap();
    c.fill(0.0);
    {
        let mut session = engine.session("add_kernel").unwrap();
        assert_eq!(session.block_size(), 4);
        session.bind_buffer_rw("a", &mut a).unwrap();
        session.bind_buffer_rw("b", &mut b).unwrap();
        session.bind_buffer_rw("c", &mut c).unwrap();
        session.bind_argument(n as i32).unwrap();
        session.write_buffer("a").unwrap();
        session.write_buffer("b").unwrap();
        session.execute(n).unwrap();
        session.read_buffer("c").unwrap();
    }
    assert!(c.iter().all(|&v| v == 3.0), "{:?}", c);
    assert_eq!(engine.api().stats().builds(), 2);
}

#[test]
fn test_build_options_passed_to_compiler() {
    init_logger();
    let config = EngineConfig::builder()
        .device_kind(DeviceKind::Cpu)
        .block_size(4)
        .build_options(vec!["-cl-fast-relaxed-math".to_string()])
        .build();
    let mut engine = Engine::new(cpu_host(), config).unwrap();
    engine.add_source(ADD_SOURCE).unwrap();

    assert_eq!(
        engine.api().stats().last_options(),
        "-DBLOCK_SIZE=4 -cl-fast-relaxed-math"
    );
    assert_eq!(engine.program().unwrap().options(), "-DBLOCK_SIZE=4 -cl-fast-relaxed-math");

    engine.set_build_options(Vec::new()).unwrap();
    assert!(engine.is_program_current());
    assert_eq!(engine.api().stats().last_options(), "-DBLOCK_SIZE=4");
    assert_eq!(engine.api().stats().builds(), 2);
}

#[test]
fn test_build_failure_carries_log() {
    init_logger();
    let config = EngineConfig::builder().device_kind(DeviceKind::Cpu).build();
    let mut engine = Engine::new(cpu_host(), config).unwrap();
    let broken = "__kernel void add_kernel(__global float *a) {\n    a[0] = 1.0f;\n";

    match engine.add_source(broken).err().unwrap() {
        DispatchError::BuildFailure { log } => assert!(log.contains("never closed"), "{}", log),
        other => panic!("unexpected error: {}", other),
    }
    assert!(engine.program().is_none());
    assert!(matches!(engine.session("add_kernel").err().unwrap(), DispatchError::ProgramNotBuilt));
    // the broken text stays in the source
    assert!(engine.build().is_err());
}

#[test]
fn test_timed_execution_and_drop_drain_queue() {
    let engine = cpu_engine(8);
    let mut src = vec![1.0f32; 10];
    let mut dst = vec![0.0f32; 10];

    {
        let mut session = engine.session("copy_kernel").unwrap();
        session.bind_buffer_rw("src", &mut src).unwrap();
        session.bind_buffer_rw("dst", &mut dst).unwrap();
        session.bind_argument(10i32).unwrap();
        session.write_buffer("src").unwrap();

        let elapsed = session.execute_timed(10).unwrap();
        assert!(elapsed.as_secs() < 60);
        assert_eq!(engine.api().stats().finishes(), 1);

        session.finish().unwrap();
        assert_eq!(engine.api().stats().finishes(), 2);
        session.read_buffer("dst").unwrap();
    }

    assert_eq!(engine.api().stats().finishes(), 3);
    assert_eq!(dst, vec![1.0; 10]);
}

#[test]
fn test_zero_block_size_rejected() {
    init_logger();
    let config = EngineConfig::builder().device_kind(DeviceKind::Cpu).block_size(0).build();
    assert!(matches!(
        Engine::new(cpu_host(), config).err().unwrap(),
        DispatchError::InvalidBlockSize(0)
    ));

    let mut engine = cpu_engine(8);
    assert!(engine.set_block_size(0).is_err());
    assert_eq!(engine.block_size(), 8);
    assert!(engine.is_program_current());
}
