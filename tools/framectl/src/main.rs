/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! framectl: look at the shared frame layout and run the protocol against a simulated card.

use {
    anyhow::{anyhow, Context, Result},
    clap::{value_parser, Arg, ArgAction, ArgMatches, Command},
    colored::*,
    prettytable::{row, Table},
    std::{
        fmt,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    },
    vidlink::{
        bridge::Submission,
        config::DriverConfig,
        console,
        devfile::ResourceRegistry,
        doorbell::FlagRegister,
        format::PIX_FMT_NV12,
        layout::{Field, CONTROL_FIELDS, FRAME_FIELDS, MAX_FRAMES},
        mm::size_human_readable_ceil,
        peer::RemotePeer,
        pci::resource,
        sim::SimulatedFunction,
        BufferMeta, BufferSink, BufferState, SharedRegion, Side, VideoOutDevice,
    },
};

struct Stdout;

impl console::interface::Write for Stdout {
    fn write_fmt(&self, args: fmt::Arguments) -> fmt::Result {
        use std::io::Write;
        std::io::stdout().write_fmt(args).map_err(|_| fmt::Error)
    }
}

static STDOUT: Stdout = Stdout;

#[derive(Default)]
struct Counter {
    done: AtomicUsize,
    errors: AtomicUsize,
}

impl BufferSink for Counter {
    fn buffer_done(&self, _index: usize, state: BufferState) {
        match state {
            BufferState::Error => self.errors.fetch_add(1, Ordering::Relaxed),
            _ => self.done.fetch_add(1, Ordering::Relaxed),
        };
    }
}

fn main() -> Result<()> {
    let matches = Command::new("framectl - frame buffer protocol tool")
        .about("Inspect the shared frame layout and simulate the video link")
        .disable_version_flag(true)
        .subcommand_required(true)
        .subcommand(Command::new("layout").about("Print control page and frame header layout"))
        .subcommand(
            Command::new("simulate")
                .about("Stream frames through a simulated card")
                .arg(
                    Arg::new("buffers")
                        .long("buffers")
                        .help("Number of video buffers")
                        .value_parser(value_parser!(u32).range(1..=MAX_FRAMES as i64))
                        .default_value("4"),
                )
                .arg(
                    Arg::new("rounds")
                        .long("rounds")
                        .help("Number of queue and process rounds")
                        .value_parser(value_parser!(u32))
                        .default_value("3"),
                )
                .arg(
                    Arg::new("width")
                        .long("width")
                        .value_parser(value_parser!(u32))
                        .default_value("1920"),
                )
                .arg(
                    Arg::new("height")
                        .long("height")
                        .value_parser(value_parser!(u32))
                        .default_value("1080"),
                )
                .arg(
                    Arg::new("shared")
                        .long("shared-mib")
                        .help("Size of the shared window in MiB")
                        .value_parser(value_parser!(u32).range(1..=1024))
                        .default_value("64"),
                )
                .arg(
                    Arg::new("params")
                        .long("params")
                        .help("Driver parameters, e.g. \"debug=0xc0 device_files=1\"")
                        .default_value(""),
                )
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .help("Print driver log")
                        .action(ArgAction::SetTrue),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("layout", _)) => {
            print_fields("Control page", CONTROL_FIELDS);
            print_fields("Frame header", FRAME_FIELDS);
            Ok(())
        }
        Some(("simulate", args)) => simulate(args),
        _ => Err(anyhow!("unknown command")),
    }
}

fn print_fields(title: &str, fields: &[Field]) {
    println!("{:>12} {}", "Layout".green().bold(), title);
    let mut table = Table::new();
    table.add_row(row![b -> "Field", b -> "Offset", b -> "Size"]);
    for field in fields {
        table.add_row(row![field.name, format!("{:#06x}", field.offset), field.size]);
    }
    table.printstd();
}

fn arg(args: &ArgMatches, name: &str) -> Result<u32> {
    args.get_one::<u32>(name)
        .copied()
        .ok_or_else(|| anyhow!("missing --{}", name))
}

fn simulate(args: &ArgMatches) -> Result<()> {
    let buffers = arg(args, "buffers")? as usize;
    let rounds = arg(args, "rounds")?;
    let shared = arg(args, "shared")? as usize * 1024 * 1024;
    let params = args
        .get_one::<String>("params")
        .map_or("", String::as_str);

    if args.get_flag("verbose") {
        console::register_console(&STDOUT);
    }

    let config = DriverConfig::parse(params).context("bad driver parameters")?;
    config.apply();

    let sim = Arc::new(
        SimulatedFunction::new(shared).ok_or_else(|| anyhow!("cannot allocate shared window"))?,
    );
    let sink = Arc::new(Counter::default());
    let files = ResourceRegistry::new();

    let device = VideoOutDevice::probe(sim.clone(), &config, sink.clone(), &files)
        .context("probe failed")?;
    let video = device.video();

    let format = video.set_format(
        PIX_FMT_NV12,
        arg(args, "width")?,
        arg(args, "height")?,
    )?;
    let setup = video.queue_setup(buffers as u32, None)?;
    let buffers = buffers.min(setup.buffers as usize);
    println!(
        "{:>12} {}x{} {}, {} buffers of {} bytes",
        "Format".green().bold(),
        format.width,
        format.height,
        vidlink::format::FourCc(format.pixelformat),
        buffers,
        setup.plane_size
    );

    let mut handles = Vec::with_capacity(buffers);
    for index in 0..buffers {
        let size = video.buf_prepare(index, setup.plane_size as usize)?;
        handles.push(video.alloc_buffer(index, size as usize)?);
    }

    let bar = |res: usize| {
        sim.memory(resource::BARS[res])
            .ok_or_else(|| anyhow!("{} not present", resource::NAMES[res]))
    };
    let peer = RemotePeer::new(
        SharedRegion::attach(bar(resource::SHARED_MEMORY)?)?,
        FlagRegister::new(bar(resource::INTERRUPT_ACK)?)
            .ok_or_else(|| anyhow!("ack register too small"))?,
        FlagRegister::new(bar(resource::INTERRUPT_REQUEST)?)
            .ok_or_else(|| anyhow!("request register too small"))?,
        &*sim,
    );
    peer.service(|_| ())?;

    video.start_streaming();
    for round in 0..rounds {
        let mut claimed = 0;
        for index in 0..buffers {
            let meta = BufferMeta {
                sequence: round * buffers as u32 + index as u32,
                index: index as u32,
                ..Default::default()
            };
            if let Submission::Claimed { .. } = video.buf_queue(index, &meta)? {
                claimed += 1;
            }
        }
        let done = peer.service(|frame| {
            let pattern = [frame.serial() as u8; 64];
            frame.write_payload(0, &pattern);
        })?;
        println!(
            "{:>12} round {}: {} claimed, {} processed",
            "Streaming".green().bold(),
            round,
            claimed,
            done.finished
        );
    }
    let forced = video.stop_streaming();

    print_statistics(device.region(), sink.done.load(Ordering::Relaxed), forced);
    print_directory(device.region())?;

    drop(handles);
    device.remove();
    Ok(())
}

fn print_statistics(region: &SharedRegion, done: usize, forced: usize) {
    let stats = region.statistics();
    let (used, unit) = size_human_readable_ceil(stats.next_offset as usize);

    let mut table = Table::new();
    table.add_row(row![b -> "Counter", b -> "Value"]);
    table.add_row(row!["indices used", stats.indices_used]);
    table.add_row(row!["next offset", format!("{:#x} ({} {})", stats.next_offset, used, unit)]);
    table.add_row(row!["next serial", stats.next_serial]);
    table.add_row(row!["input frames", stats.input_frames]);
    table.add_row(row!["frames dropped", stats.frames_dropped]);
    table.add_row(row!["buffers done", done]);
    table.add_row(row!["returned on stop", forced]);
    println!("{:>12} Statistics", "Summary".green().bold());
    table.printstd();
}

fn print_directory(region: &SharedRegion) -> Result<()> {
    let mut table = Table::new();
    table.add_row(row![
        b -> "#",
        b -> "Offset",
        b -> "Size",
        b -> "Serial",
        b -> "Host state",
        b -> "Peer state",
        b -> "Buffer"
    ]);
    for index in 0..region.checked_count()? {
        let frame = region.checked_frame(index)?;
        let (host, peer) = match frame.state() {
            Some(state) => (state.name(Side::Host), state.name(Side::Peer)),
            None => ("?", "?"),
        };
        table.add_row(row![
            index,
            format!("{:#x}", frame.offset()),
            frame.frame_size(),
            frame.serial(),
            host,
            peer,
            frame.host_buffer_ref()
        ]);
    }
    println!("{:>12} Frame directory", "Summary".green().bold());
    table.printstd();
    Ok(())
}
