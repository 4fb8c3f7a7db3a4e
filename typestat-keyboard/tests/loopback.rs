//! Keyboard interface against an in-memory device.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use typestat_keyboard::{
    ClassifiedKeyEvent, KeyEventStateMachine, KeyType, KeyboardError, KeyboardInterface,
    LayerDecodeMode, RawKeyEvent,
};
use typestat_transport::loopback::{self, LoopbackDevice, LoopbackHandle};
use typestat_transport::protocol::cmd;
use typestat_transport::{CorrelationManager, TransportDeviceInfo, TransportError};

const MT_LSFT_A: u16 = 0x2204;

fn device_info() -> TransportDeviceInfo {
    TransportDeviceInfo {
        vid: 0xFEED,
        pid: 0x6060,
        device_path: "loopback".into(),
        serial: None,
        product_name: Some("Loopback keyboard".into()),
    }
}

/// Answers layer queries for a fixed keymap until the host goes away
async fn run_firmware(mut device: LoopbackDevice, keymap: Vec<Vec<Vec<u16>>>, truncate: usize) {
    let layers = keymap.len() as u8;
    let rows = keymap.first().map_or(0, |l| l.len()) as u8;
    let cols = keymap
        .first()
        .and_then(|l| l.first())
        .map_or(0, |r| r.len()) as u8;

    while let Some(command) = device.next_command().await {
        let payload: Vec<u8> = match command.cmd {
            cmd::GET_LAYER_METADATA => vec![layers, rows, cols],
            cmd::GET_LAYERS => {
                let mut bytes: Vec<u8> = keymap
                    .iter()
                    .flatten()
                    .flatten()
                    .flat_map(|kc| kc.to_be_bytes())
                    .collect();
                bytes.truncate(bytes.len().saturating_sub(truncate));
                bytes
            }
            _ => continue,
        };
        if device
            .reply(command.cmd, command.call_id, &payload)
            .await
            .is_err()
        {
            break;
        }
    }
}

fn keymap() -> Vec<Vec<Vec<u16>>> {
    // 2 layers, 2 rows, 14 cols: 112 bytes, five reports
    (0..2u16)
        .map(|layer| {
            (0..2u16)
                .map(|row| (0..14u16).map(|col| layer * 0x100 + row * 14 + col + 4).collect())
                .collect()
        })
        .collect()
}

fn connect(truncate: usize) -> (KeyboardInterface, LoopbackHandle) {
    let (transport, reports, device) = loopback::pair(device_info());
    let handle = device.handle();
    tokio::spawn(run_firmware(device, keymap(), truncate));
    let manager = CorrelationManager::start_with_delay(Arc::new(transport), reports, Duration::ZERO);
    (KeyboardInterface::new(manager), handle)
}

async fn send_key(handle: &LoopbackHandle, keycode: u16, pressed: bool) {
    let event = RawKeyEvent {
        keycode,
        col: 1,
        row: 0,
        pressed,
        mods: 0,
        layer: 0,
    };
    handle
        .send(cmd::KEY_EVENT, 0, &event.to_payload())
        .await
        .unwrap();
}

#[tokio::test]
async fn layers_require_metadata() {
    let (kb, _handle) = connect(0);
    let err = kb.get_layers().await.unwrap_err();
    assert!(matches!(err, KeyboardError::MissingLayerMetadata));
}

#[tokio::test]
async fn metadata_then_layers() {
    let (kb, _handle) = connect(0);

    let metadata = kb.get_layer_metadata().await.unwrap();
    assert_eq!(metadata.number_of_layers, 2);
    assert_eq!(metadata.matrix_rows, 2);
    assert_eq!(metadata.matrix_cols, 14);
    assert_eq!(kb.layer_metadata().await, Some(metadata));

    let layers = kb.get_layers().await.unwrap();
    assert_eq!(layers.layers, keymap());
    assert_eq!(layers.keycode(1, 1, 13), Some(0x100 + 14 + 13 + 4));
}

#[tokio::test]
async fn short_layer_dump_strict_and_lenient() {
    // 104 bytes fill exactly four reports, so no padding hides the gap
    let (kb, _handle) = connect(8);
    kb.get_layer_metadata().await.unwrap();
    let lenient = kb.get_layers().await.unwrap();
    assert_eq!(lenient.layers.len(), 2);
    assert_eq!(lenient.layers[1][1].len(), 10);

    let (kb, _handle) = connect(8);
    let kb = kb.with_decode_mode(LayerDecodeMode::Strict);
    kb.get_layer_metadata().await.unwrap();
    let err = kb.get_layers().await.unwrap_err();
    assert!(matches!(err, KeyboardError::Transport(TransportError::Parse(_))));
}

#[tokio::test]
async fn key_events_reach_the_state_machine() {
    let (kb, handle) = connect(0);
    let mut events = kb.subscribe_key_events();
    let mut sm = KeyEventStateMachine::new();

    send_key(&handle, MT_LSFT_A, true).await;
    send_key(&handle, MT_LSFT_A, false).await;

    let t0 = Instant::now();
    let down = events.next().await.unwrap();
    assert!(sm.handle(down, t0).is_none());
    let up = events.next().await.unwrap();
    let classified = sm.handle(up, t0 + Duration::from_millis(90)).unwrap();

    assert_eq!(
        classified,
        ClassifiedKeyEvent {
            keycode: 0x04,
            key_type: KeyType::Plain,
            col: 1,
            row: 0,
            layer: 0,
            mods: 0,
        }
    );
}

#[tokio::test]
async fn unsolicited_reply_does_not_disturb_events() {
    let (kb, handle) = connect(0);
    let mut events = kb.subscribe_key_events();

    // nobody asked for call 99; the reply is dropped
    handle.send(cmd::GET_LAYERS, 99, &[1, 2, 3]).await.unwrap();
    send_key(&handle, 0x04, true).await;

    let event = events.next().await.unwrap();
    assert_eq!(event.keycode, 0x04);
    assert!(event.pressed);
}

#[tokio::test]
async fn disconnect_ends_key_event_stream() {
    let (transport, reports, device) = loopback::pair(device_info());
    let manager = CorrelationManager::start_with_delay(Arc::new(transport), reports, Duration::ZERO);
    let kb = KeyboardInterface::new(manager);
    let mut events = kb.subscribe_key_events();

    drop(device);
    assert!(events.next().await.is_none());
    let err = kb.get_layer_metadata().await.unwrap_err();
    assert!(matches!(err, KeyboardError::Transport(TransportError::Disconnected)));
}
