//! Engine lifecycle driven through fake controllers and a recording bus.

mod common;

use common::{engine, guid, wait_for, BusCall, FakeDevice, FakeSource, RecordingTransport};
use padbus::input::{CooperativeLevel, LOOPBACK_PRODUCT};
use padbus::protocol::{buttons, GenericReport, Stick};
use padbus::{Engine, EngineError, EngineOptions};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

fn layout(engine: &padbus::Engine) -> Vec<(usize, padbus::input::DeviceGuid)> {
    engine.status().slots.iter().map(|s| (s.index, s.guid)).collect()
}

mod reconcile {
    use super::*;

    #[test]
    fn claims_in_enumeration_order_without_plugging_while_stopped() {
        let (a, b) = (FakeDevice::new(1), FakeDevice::new(2));
        let source = FakeSource::with(&[a, b]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        let summary = engine.reconcile();
        assert_eq!(summary.attached, 2);
        assert_eq!(summary.claimed, vec![1, 2]);
        assert_eq!(layout(&engine), vec![(1, guid(1)), (2, guid(2))]);
        assert!(transport.calls().is_empty());
        assert_eq!(engine.channel().plugged_count(), 0);
    }

    #[test]
    fn rescan_without_changes_is_a_no_op() {
        let source = FakeSource::with(&[FakeDevice::new(1), FakeDevice::new(2)]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);
        engine.start().unwrap();

        let before = layout(&engine);
        let controls = transport.control_calls();
        let summary = engine.reconcile();

        assert!(summary.claimed.is_empty());
        assert!(summary.vacated.is_empty());
        assert_eq!(layout(&engine), before);
        assert_eq!(transport.control_calls(), controls);
        assert_eq!(source.acquires.load(std::sync::atomic::Ordering::SeqCst), 2);
        engine.stop().unwrap();
    }

    #[test]
    fn detach_and_new_device_reuse_the_lowest_slot() {
        let (a, b, c) = (FakeDevice::new(1), FakeDevice::new(2), FakeDevice::new(3));
        let source = FakeSource::with(&[a.clone(), b.clone()]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        engine.start().unwrap();
        assert_eq!(layout(&engine), vec![(1, guid(1)), (2, guid(2))]);
        assert_eq!(
            transport.control_calls(),
            vec![BusCall::Plugin(1), BusCall::Plugin(2)]
        );

        a.detach();
        transport.clear();
        let summary = engine.reconcile();
        assert_eq!(summary.vacated, vec![1]);
        assert_eq!(transport.control_calls(), vec![BusCall::Unplug(1)]);
        assert_eq!(layout(&engine), vec![(2, guid(2))]);
        assert_eq!(engine.status().slot_count, 2);

        source.attach(c);
        transport.clear();
        let summary = engine.reconcile();
        assert_eq!(summary.claimed, vec![1]);
        assert_eq!(transport.control_calls(), vec![BusCall::Plugin(1)]);
        assert_eq!(layout(&engine), vec![(1, guid(3)), (2, guid(2))]);
        assert_eq!(engine.channel().plugged_count(), 2);

        engine.stop().unwrap();
        assert_eq!(engine.channel().plugged_count(), 0);
    }

    #[test]
    fn device_never_occupies_two_slots() {
        let a = FakeDevice::new(1);
        let source = FakeSource::with(&[a.clone()]);
        // Same device reported twice by a confused backend.
        source.attach(a);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        engine.reconcile();
        assert_eq!(layout(&engine), vec![(1, guid(1))]);
    }

    #[test]
    fn loopback_and_empty_devices_are_never_claimed() {
        let mut loopback_info = FakeDevice::new(1).info.clone();
        loopback_info.product = LOOPBACK_PRODUCT;
        let mut empty_info = FakeDevice::new(2).info.clone();
        empty_info.button_count = 0;
        empty_info.axis_count = 0;

        let source = FakeSource::with(&[
            FakeDevice::with_info(loopback_info),
            FakeDevice::with_info(empty_info),
            FakeDevice::new(3),
        ]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        let summary = engine.reconcile();
        assert_eq!(summary.skipped, 2);
        assert_eq!(layout(&engine), vec![(1, guid(3))]);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn start_fails_when_bus_cannot_be_opened() {
        let source = FakeSource::with(&[FakeDevice::new(1)]);
        let transport = RecordingTransport::new();
        transport.fail_open.store(true, std::sync::atomic::Ordering::SeqCst);
        let engine = engine(&source, &transport);

        assert!(matches!(engine.start(), Err(EngineError::ChannelOpen(_))));
        assert!(!engine.is_running());
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn second_start_is_rejected() {
        let source = FakeSource::with(&[FakeDevice::new(1)]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));
        assert_eq!(transport.control_calls(), vec![BusCall::Plugin(1)]);
        engine.stop().unwrap();
    }

    #[test]
    fn stop_unplugs_every_slot_and_closes_the_bus() {
        let source = FakeSource::with(&[FakeDevice::new(1), FakeDevice::new(2)]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        engine.start().unwrap();
        transport.clear();
        engine.stop().unwrap();

        assert_eq!(
            transport.control_calls(),
            vec![BusCall::Unplug(1), BusCall::Unplug(2)]
        );
        assert_eq!(engine.channel().plugged_count(), 0);
        assert!(!engine.channel().is_open());
        assert!(engine.status().slots.iter().all(|s| !s.active));

        // Idempotent.
        engine.stop().unwrap();
        assert_eq!(transport.control_calls().len(), 2);
    }

    #[test]
    fn restart_plugs_the_same_slots_again() {
        let source = FakeSource::with(&[FakeDevice::new(1)]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        engine.start().unwrap();
        engine.stop().unwrap();
        engine.start().unwrap();

        assert_eq!(
            transport.control_calls(),
            vec![BusCall::Plugin(1), BusCall::Unplug(1), BusCall::Plugin(1)]
        );
        assert_eq!(engine.channel().plugged_count(), 1);
        engine.stop().unwrap();
    }

    #[test]
    fn hot_plugged_device_is_forwarded_while_running() {
        let source = FakeSource::with(&[FakeDevice::new(1)]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);
        engine.start().unwrap();

        source.attach(FakeDevice::new(2));
        engine.reconcile();

        assert!(wait_for(|| !transport.reports_for(2).is_empty()));
        assert_eq!(
            transport.control_calls(),
            vec![BusCall::Plugin(1), BusCall::Plugin(2)]
        );
        engine.stop().unwrap();
    }

    #[test]
    fn stop_is_bounded_when_a_bus_call_hangs() {
        let source = FakeSource::with(&[FakeDevice::new(1)]);
        let transport = RecordingTransport::new();
        let engine = Engine::new(
            source.clone(),
            transport.clone(),
            EngineOptions {
                join_timeout: Duration::from_millis(50),
                ..common::fast_options()
            },
        );
        engine.start().unwrap();

        transport.stall_reports.store(true, Ordering::SeqCst);
        assert!(wait_for(|| transport.stalled.load(Ordering::SeqCst) > 0));

        let started = Instant::now();
        engine.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!engine.is_running());
        assert!(!engine.status().running);
        // The stuck call holds the handle, so the bus stays open.
        assert!(engine.channel().is_open());
        assert_eq!(transport.closes.load(Ordering::SeqCst), 0);
        assert_eq!(transport.control_calls(), vec![BusCall::Plugin(1), BusCall::Unplug(1)]);

        transport.stall_reports.store(false, Ordering::SeqCst);
        assert!(wait_for(|| {
            engine.stop().unwrap();
            !engine.channel().is_open()
        }));
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_exits_when_its_device_vanishes() {
        let a = FakeDevice::new(1);
        let source = FakeSource::with(&[a.clone()]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);
        engine.start().unwrap();
        assert!(wait_for(|| engine.status().slots[0].active));

        a.detach();
        assert!(wait_for(|| !engine.status().slots[0].active));
        // The slot stays claimed until the next reconcile.
        assert_eq!(layout(&engine), vec![(1, guid(1))]);
        engine.stop().unwrap();
    }
}

mod forwarding {
    use super::*;

    #[test]
    fn reports_carry_the_slot_serial_and_mapped_state() {
        let a = FakeDevice::new(1);
        let mut report = GenericReport::default();
        report.set_buttons(buttons::A | buttons::DPAD_UP);
        report.set_stick(Stick::LeftX, 0xFF);
        report.set_triggers(0x10, 0xF0);
        a.set_report(report);

        let source = FakeSource::with(&[a]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);
        engine.start().unwrap();

        assert!(wait_for(|| !transport.reports_for(1).is_empty()));
        engine.stop().unwrap();

        let frame = &transport.reports_for(1)[0];
        assert_eq!(frame.len(), 28);
        assert_eq!(frame[0], 0x1C);
        assert_eq!(frame[4], 1);
        assert_eq!(frame[9], 0x14);
        assert_eq!(frame[10], 0x01);
        assert_eq!(frame[11], 0x10);
        assert_eq!((frame[12], frame[13]), (0x10, 0xF0));
        assert_eq!(i16::from_le_bytes([frame[14], frame[15]]), 32767);
        assert_eq!(i16::from_le_bytes([frame[16], frame[17]]), 0);
    }

    #[test]
    fn no_report_until_the_device_has_state() {
        let a = FakeDevice::new(1);
        *a.report.lock().unwrap() = None;
        let source = FakeSource::with(&[a.clone()]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);
        engine.start().unwrap();

        assert!(wait_for(|| a.polls.load(std::sync::atomic::Ordering::SeqCst) > 5));
        assert!(transport.reports().is_empty());

        a.set_report(GenericReport::default());
        assert!(wait_for(|| !transport.reports_for(1).is_empty()));
        engine.stop().unwrap();
    }

    #[test]
    fn disabled_at_start_gets_no_virtual_pad() {
        let source = FakeSource::with(&[FakeDevice::new(1), FakeDevice::new(2)]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        engine.reconcile();
        engine.set_slot_enabled(2, false).unwrap();
        engine.start().unwrap();

        assert!(wait_for(|| transport.reports_for(1).len() > 3));
        assert_eq!(transport.control_calls(), vec![BusCall::Plugin(1)]);
        assert!(transport.reports_for(2).is_empty());
        engine.stop().unwrap();
    }

    #[test]
    fn disabling_a_running_slot_stops_its_reports() {
        let source = FakeSource::with(&[FakeDevice::new(1)]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);
        engine.start().unwrap();
        assert!(wait_for(|| !transport.reports_for(1).is_empty()));

        engine.set_slot_enabled(1, false).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        transport.clear();
        std::thread::sleep(Duration::from_millis(30));
        assert!(transport.reports().is_empty());
        assert!(engine.status().slots[0].active);

        engine.set_slot_enabled(1, true).unwrap();
        assert!(wait_for(|| !transport.reports_for(1).is_empty()));
        engine.stop().unwrap();
    }

    #[test]
    fn rejected_reports_are_counted_not_fatal() {
        let source = FakeSource::with(&[FakeDevice::new(1)]);
        let transport = RecordingTransport::new();
        transport.reject_reports.store(true, std::sync::atomic::Ordering::SeqCst);
        let engine = engine(&source, &transport);
        engine.start().unwrap();

        assert!(wait_for(|| engine.status().slots[0].report_failures > 3));
        let status = engine.status();
        assert!(status.running);
        assert!(status.channel_failures >= status.slots[0].report_failures);
        assert!(status.slots[0].active);
        engine.stop().unwrap();
    }
}

mod slot_control {
    use super::*;

    #[test]
    fn enable_rejects_missing_slots() {
        let (a, b) = (FakeDevice::new(1), FakeDevice::new(2));
        let source = FakeSource::with(&[a.clone(), b]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);
        engine.reconcile();

        assert!(matches!(engine.set_slot_enabled(0, true), Err(EngineError::SlotOutOfRange(0))));
        assert!(matches!(engine.set_slot_enabled(3, true), Err(EngineError::SlotOutOfRange(3))));

        a.detach();
        engine.reconcile();
        assert!(matches!(engine.set_slot_enabled(1, true), Err(EngineError::SlotEmpty(1))));
        engine.set_slot_enabled(2, false).unwrap();
        assert!(!engine.status().slots[0].enabled);
    }

    #[test]
    fn exclusive_mode_is_read_at_start() {
        let a = FakeDevice::new(1);
        let source = FakeSource::with(&[a.clone()]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        engine.set_exclusive(true);
        engine.start().unwrap();
        assert_eq!(a.levels(), vec![CooperativeLevel::Exclusive]);

        engine.set_exclusive(false);
        assert!(!engine.status().exclusive_mode);
        assert_eq!(a.levels(), vec![CooperativeLevel::Exclusive]);

        engine.stop().unwrap();
        assert_eq!(
            a.levels(),
            vec![CooperativeLevel::Exclusive, CooperativeLevel::Shared]
        );

        engine.start().unwrap();
        engine.stop().unwrap();
        assert_eq!(
            a.levels(),
            vec![
                CooperativeLevel::Exclusive,
                CooperativeLevel::Shared,
                CooperativeLevel::Shared
            ]
        );
    }

    #[test]
    fn exclusive_pad_keeps_forwarding_new_state() {
        let a = FakeDevice::new(1);
        let source = FakeSource::with(&[a.clone()]);
        let transport = RecordingTransport::new();
        let engine = engine(&source, &transport);

        engine.set_exclusive(true);
        engine.start().unwrap();
        assert!(wait_for(|| !transport.reports_for(1).is_empty()));
        assert_eq!(a.levels(), vec![CooperativeLevel::Exclusive]);

        let mut report = GenericReport::default();
        report.set_buttons(buttons::B);
        a.set_report(report);
        assert!(wait_for(|| transport
            .reports_for(1)
            .last()
            .is_some_and(|frame| frame[11] == 0x20)));
        engine.stop().unwrap();
    }
}
