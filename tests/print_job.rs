mod common;

use std::io::Cursor;
use std::time::Duration;

use catprint::{
    CatPrinter, CatPrinterError, Command, CommandType, DATA_FLOW_PAUSE, DATA_FLOW_RESUME, DeviceState,
    DumpTransport, JobStage, LATTICE_END, LATTICE_START, MemoryTransport, Model, PrinterOptions,
    SessionState, frame, parse_notification,
};
use common::{LINE, commands, line, pbm, printer};
use pretty_assertions::assert_eq;

fn bitmaps(sent: &[(u8, Vec<u8>)]) -> Vec<Vec<u8>> {
    sent.iter()
        .filter(|(c, _)| *c == Command::Bitmap as u8)
        .map(|(_, p)| p.clone())
        .collect()
}

fn names(sent: &[(u8, Vec<u8>)]) -> Vec<Command> {
    sent.iter().filter_map(|(c, _)| Command::from_byte(*c)).collect()
}

fn failed_with(err: &CatPrinterError, stage: JobStage, inner: fn(&CatPrinterError) -> bool) -> bool {
    match err {
        CatPrinterError::Job { stage: s, source } => *s == stage && inner(source),
        _ => false,
    }
}

#[tokio::test(start_paused = true)]
async fn prints_a_pbm_image() {
    let (mut printer, handle) = printer(MemoryTransport::new(), Model::Gb01, PrinterOptions::new()).await;
    let mut first = line(0);
    first[0] = 0x80;
    printer.print_pbm(Cursor::new(pbm(&[first, line(0xff)]))).await.unwrap();

    for write in handle.writes() {
        assert!(write.len() <= 200, "write of {} bytes", write.len());
    }
    let sent = commands(&handle.written_bytes());
    assert_eq!(
        names(&sent),
        vec![
            Command::GetDeviceState,
            Command::SetDpi,
            Command::SetSpeed,
            Command::SetEnergy,
            Command::ApplyEnergy,
            Command::UpdateDevice,
            Command::Lattice,
            Command::Bitmap,
            Command::Bitmap,
            Command::Lattice,
            Command::SetSpeed,
            Command::Feed,
            Command::GetDeviceState,
        ]
    );
    assert_eq!(sent[3].1, vec![0x00, 0x40]);
    assert_eq!(sent[6].1, LATTICE_START.to_vec());
    assert_eq!(sent[9].1, LATTICE_END.to_vec());
    assert_eq!(sent[11].1, vec![128, 0]);

    let lines = bitmaps(&sent);
    assert_eq!(lines[0][0], 0x01);
    assert!(lines[0][1..].iter().all(|&b| b == 0));
    assert_eq!(lines[1], vec![0xff; LINE]);
    assert_eq!(printer.session().state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn multi_page_pbm_prints_every_page() {
    let (mut printer, handle) = printer(MemoryTransport::new(), Model::Gb02, PrinterOptions::new()).await;
    let mut input = pbm(&[line(1), line(2)]);
    input.extend(pbm(&[line(3)]));
    printer.print_pbm(Cursor::new(input)).await.unwrap();
    let lines = bitmaps(&commands(&handle.written_bytes()));
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2], vec![3u8.reverse_bits(); LINE]);
}

#[tokio::test(start_paused = true)]
async fn vertical_flip_reverses_line_order() {
    let options = PrinterOptions::new().with_flip(false, true);
    let (mut printer, handle) = printer(MemoryTransport::new(), Model::Gb01, options).await;
    printer.print_pbm(Cursor::new(pbm(&[line(0x80), line(0x03)]))).await.unwrap();
    let lines = bitmaps(&commands(&handle.written_bytes()));
    assert_eq!(lines, vec![vec![0xc0; LINE], vec![0x01; LINE]]);
}

#[tokio::test(start_paused = true)]
async fn wrong_width_fails_while_preparing() {
    let (mut printer, handle) = printer(MemoryTransport::new(), Model::Gb01, PrinterOptions::new()).await;
    let err = printer.print_pbm(Cursor::new(b"P4\n8 1\n\xff".to_vec())).await.unwrap_err();
    assert!(failed_with(&err, JobStage::Preparing, |e| matches!(e, CatPrinterError::InvalidImageData(_))));
    assert_eq!(handle.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn link_loss_reports_the_stage() {
    let transport = MemoryTransport::new().fail_after(0);
    let (mut printer, _handle) = printer(transport, Model::Gb01, PrinterOptions::new()).await;
    let err = printer.print_pbm(Cursor::new(pbm(&[line(0)]))).await.unwrap_err();
    assert!(failed_with(&err, JobStage::Preparing, |e| matches!(e, CatPrinterError::Transport(_))));
    assert_eq!(printer.session().state(), SessionState::Idle);

    // setup goes out in one write, the fourth line forces the second
    let transport = MemoryTransport::new().fail_after(1);
    let (mut printer, handle) = common::printer(transport, Model::Gb01, PrinterOptions::new()).await;
    let err = printer.print_pbm(Cursor::new(pbm(&[line(0); 10]))).await.unwrap_err();
    assert!(failed_with(&err, JobStage::Streaming, |e| matches!(e, CatPrinterError::Transport(_))));
    assert_eq!(
        err.to_string(),
        "Print job failed while streaming: Transport error: link lost"
    );
    assert_eq!(handle.write_count(), 1);
    assert_eq!(printer.session().state(), SessionState::Idle);
    assert_eq!(printer.session().flow().buffered_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn feed_defect_models_feed_with_blank_lines() {
    let options = PrinterOptions::new().with_extra_feed(4);
    let (mut printer, handle) = printer(MemoryTransport::new(), Model::Mx05, options).await;
    printer.print_pbm(Cursor::new(pbm(&[line(0xaa)]))).await.unwrap();
    let sent = commands(&handle.written_bytes());
    assert!(!names(&sent).contains(&Command::Feed));
    assert_eq!(bitmaps(&sent).len(), 1 + 4);
}

#[tokio::test(start_paused = true)]
async fn dry_run_blanks_image_lines() {
    let options = PrinterOptions::new().with_dry_run(true);
    let (mut printer, handle) = printer(MemoryTransport::new(), Model::Gb01, options).await;
    printer.print_pbm(Cursor::new(pbm(&[line(0xff), line(0x0f)]))).await.unwrap();
    let lines = bitmaps(&commands(&handle.written_bytes()));
    assert_eq!(lines, vec![vec![0; LINE], vec![0; LINE]]);
}

#[tokio::test(start_paused = true)]
async fn prints_text_with_text_energy() {
    let (mut printer, handle) = printer(MemoryTransport::new(), Model::Gb01, PrinterOptions::new()).await;
    printer.print_text(common::font(), Cursor::new("A\nA A")).await.unwrap();

    let sent = commands(&handle.written_bytes());
    let energy = sent.iter().find(|(c, _)| *c == Command::SetEnergy as u8).unwrap();
    assert_eq!(energy.1, vec![0x00, 0x60]);

    // two text rows of max height + descent lines each
    let lines = bitmaps(&sent);
    assert_eq!(lines.len(), 20);
    // top of "A" sits at row 2, x = 1, bit-reversed on the wire
    assert_eq!(lines[2][0], 0b0000_0010);
    assert_eq!(lines[12][0], 0b0000_0010);
}

#[tokio::test(start_paused = true)]
async fn text_with_nul_is_rejected() {
    let (mut printer, _handle) = printer(MemoryTransport::new(), Model::Gb01, PrinterOptions::new()).await;
    let err = printer.print_text(common::font(), Cursor::new(b"A\0B\n".to_vec())).await.unwrap_err();
    assert!(failed_with(&err, JobStage::Streaming, |e| matches!(e, CatPrinterError::InvalidText)));

    let err = printer.print_text(common::font(), Cursor::new(vec![0xff, 0xfe, b'\n'])).await.unwrap_err();
    assert!(failed_with(&err, JobStage::Streaming, |e| matches!(e, CatPrinterError::InvalidText)));
    assert_eq!(printer.session().state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn dump_path_receives_the_printed_raster() {
    let path = std::env::temp_dir().join(format!("catprint-dump-{}.pbm", std::process::id()));
    let options = PrinterOptions::new().with_dump_path(&path);
    let (mut printer, _handle) = printer(MemoryTransport::new(), Model::Gb01, options).await;
    printer.print_pbm(Cursor::new(pbm(&[line(0x11), line(0x22)]))).await.unwrap();

    let dumped = std::fs::read(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(dumped, pbm(&[line(0x11), line(0x22)]));
}

#[tokio::test(start_paused = true)]
async fn status_waits_for_the_state_report() {
    let transport = MemoryTransport::new().with_responder(|data| {
        let request = parse_notification(data).ok()?;
        (request.command == Command::GetDeviceState as u8)
            .then(|| frame(Command::GetDeviceState, CommandType::Response, &[0x03]).unwrap())
    });
    let (mut printer, _handle) = printer(transport, Model::Gb01, PrinterOptions::new()).await;
    let state = printer.status(Duration::from_secs(1)).await.unwrap();
    assert!(state.contains(DeviceState::OUT_OF_PAPER | DeviceState::COVER_OPEN));
    assert_eq!(state.faults(), vec!["out of paper", "cover open"]);
}

#[tokio::test(start_paused = true)]
async fn status_times_out_without_a_report() {
    let (mut printer, _handle) = printer(MemoryTransport::new(), Model::Gb01, PrinterOptions::new()).await;
    let err = printer.status(Duration::from_millis(500)).await.unwrap_err();
    assert!(matches!(err, CatPrinterError::Transport(_)));
}

#[tokio::test(start_paused = true)]
async fn abort_unblocks_a_paused_job() {
    let (printer, handle) = printer(MemoryTransport::new(), Model::Gb01, PrinterOptions::new()).await;
    let abort = printer.abort_handle();
    handle.emit(&DATA_FLOW_PAUSE);

    let job = tokio::spawn(async move {
        let mut printer = printer;
        let result = printer.print_pbm(Cursor::new(pbm(&[line(0)]))).await;
        (result, printer)
    });
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handle.write_count(), 0);
    abort.cancel();

    let (result, mut printer) = job.await.unwrap();
    let err = result.unwrap_err();
    assert!(failed_with(&err, JobStage::Preparing, |e| matches!(e, CatPrinterError::Cancelled)));
    assert_eq!(handle.write_count(), 0);

    // the next job starts with a fresh token
    handle.emit(&DATA_FLOW_RESUME);
    printer.print_pbm(Cursor::new(pbm(&[line(0)]))).await.unwrap();
    assert!(!printer.abort_handle().is_cancelled());
    assert_eq!(bitmaps(&commands(&handle.written_bytes())).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dump_transport_records_length_prefixed_writes() {
    let transport = DumpTransport::new(Vec::new());
    let mut printer = CatPrinter::connect(transport, Model::Gb01, PrinterOptions::new()).await.unwrap();
    printer.print_pbm(Cursor::new(pbm(&[line(0x55); 5]))).await.unwrap();
    let dump = printer.disconnect().await.unwrap().into_inner();

    let mut rest = &dump[..];
    let mut traffic = Vec::new();
    while !rest.is_empty() {
        let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
        assert!(len <= 200);
        traffic.extend_from_slice(&rest[2..2 + len]);
        rest = &rest[2 + len..];
    }
    assert_eq!(bitmaps(&commands(&traffic)).len(), 5);
}

#[tokio::test(start_paused = true)]
async fn disconnect_hands_back_the_transport() {
    let (printer, handle) = printer(MemoryTransport::new(), Model::Gb01, PrinterOptions::new()).await;
    assert!(handle.is_connected());
    let transport = printer.disconnect().await.unwrap();
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn commands_after_an_abort_use_a_fresh_token() {
    let (mut printer, handle) = printer(MemoryTransport::new(), Model::Gb01, PrinterOptions::new()).await;
    printer.abort_handle().cancel();
    printer.feed(50).await.unwrap();
    assert_eq!(commands(&handle.written_bytes()), vec![(Command::Feed as u8, vec![50, 0])]);
    assert!(!printer.abort_handle().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn aborted_feed_is_not_sent_with_the_next_job() {
    let (printer, handle) = printer(MemoryTransport::new(), Model::Gb01, PrinterOptions::new()).await;
    let abort = printer.abort_handle();
    handle.emit(&DATA_FLOW_PAUSE);

    let job = tokio::spawn(async move {
        let mut printer = printer;
        let result = printer.feed(50).await;
        (result, printer)
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    abort.cancel();
    let (result, mut printer) = job.await.unwrap();
    assert!(matches!(result, Err(CatPrinterError::Cancelled)));
    assert_eq!(printer.session().flow().buffered_len(), 0);

    handle.emit(&DATA_FLOW_RESUME);
    printer.print_pbm(Cursor::new(pbm(&[line(0)]))).await.unwrap();
    let sent = names(&commands(&handle.written_bytes()));
    assert_eq!(sent.first(), Some(&Command::GetDeviceState));
    assert_eq!(sent.iter().filter(|c| **c == Command::Feed).count(), 1);
    assert_eq!(sent.last(), Some(&Command::GetDeviceState));
}

#[tokio::test(start_paused = true)]
async fn abort_while_paused_mid_text() {
    // the device pauses as soon as it sees the first bitmap line
    let transport = MemoryTransport::new().with_responder(|data| {
        commands(data)
            .iter()
            .any(|(c, _)| *c == Command::Bitmap as u8)
            .then(|| DATA_FLOW_PAUSE.to_vec())
    });
    let (printer, handle) = printer(transport, Model::Gb01, PrinterOptions::new()).await;
    let abort = printer.abort_handle();

    let job = tokio::spawn(async move {
        let mut printer = printer;
        let result = printer.print_text(common::font(), Cursor::new("A\nA\n")).await;
        (result, printer)
    });
    tokio::time::sleep(Duration::from_secs(2)).await;
    // setup plus the write that triggered the pause
    let writes = handle.write_count();
    assert_eq!(writes, 2);
    abort.cancel();

    let (result, printer) = job.await.unwrap();
    let err = result.unwrap_err();
    assert!(failed_with(&err, JobStage::Streaming, |e| matches!(e, CatPrinterError::Cancelled)));
    assert_eq!(handle.write_count(), writes);
    assert_eq!(printer.session().state(), SessionState::Idle);
    assert_eq!(printer.session().flow().buffered_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn mtu_too_small_for_a_line_is_rejected_at_connect() {
    let pacing = catprint::PacingPolicy {
        mtu: 40,
        ..catprint::PacingPolicy::default()
    };
    let transport = MemoryTransport::new();
    let handle = transport.clone();
    let result = CatPrinter::connect(transport, Model::Gb01, PrinterOptions::new().with_pacing(pacing)).await;
    assert!(matches!(result, Err(CatPrinterError::InvalidOption(_))));
    assert!(!handle.is_connected());
}
