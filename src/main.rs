use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use e_sort::{CancellationToken, ExternalSorter, ExternalSorterBuilder, LineSource, SortError};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let capacity: usize = arg_parser.value_of_t_or_exit("capacity");
    let max_retries: usize = arg_parser.value_of_t_or_exit("max_retries");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let run_dir: Option<&str> = arg_parser.value_of("run_dir");
    let rw_buf_size: Option<&str> = arg_parser.value_of("rw_buf_size");

    let input = arg_parser.value_of("input").unwrap_or("-");
    let input_stream: Box<dyn BufRead> = if input == "-" {
        log::info!("reading samples from stdin");
        Box::new(io::BufReader::new(io::stdin()))
    } else {
        match fs::File::open(input) {
            Ok(file) => Box::new(io::BufReader::new(file)),
            Err(err) => {
                log::error!("input opening error: {}", err);
                process::exit(1);
            }
        }
    };
    let mut source = LineSource::new(input_stream).with_max_retries(max_retries);

    let output = arg_parser.value_of("output").unwrap_or("output.sorted.txt");

    let cancellation = CancellationToken::new();
    let handler_token = cancellation.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        log::warn!("interrupt received, acquisition stops after the next sample");
        handler_token.cancel();
    }) {
        log::warn!("interrupt handler not installed, sorting can't be cancelled: {}", err);
    }

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_capacity(capacity)
        .with_cancellation(cancellation);

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(run_dir) = run_dir {
        sorter_builder = sorter_builder.with_run_dir(path::Path::new(run_dir));
    }

    if let Some(rw_buf_size) = rw_buf_size {
        let rw_buf_size = match rw_buf_size.parse::<ByteSize>() {
            Ok(size) => size.as_u64() as usize,
            Err(err) => {
                log::error!("read/write buffer size format incorrect: {}", err);
                process::exit(1);
            }
        };
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size);
    }

    let mut sorter: ExternalSorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let summary = match sorter.sort(&mut source, path::Path::new(output)) {
        Ok(summary) => summary,
        Err(err @ SortError::Cancelled { .. }) => {
            log::warn!("{}", err);
            process::exit(130);
        }
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };

    log::info!(
        "{} samples sorted through {} runs into {}",
        summary.samples,
        summary.runs,
        output
    );

    if summary.merge.failed_runs > 0 {
        log::warn!(
            "{} runs failed during merge, output is incomplete ({} of {} samples)",
            summary.merge.failed_runs,
            summary.merge.emitted,
            summary.samples
        );
        process::exit(2);
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("e-sort")
        .about("bounded-memory external sorter for integer telemetry streams")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to read samples from, one integer per line ('-' for stdin)")
                .takes_value(true)
                .default_value("-"),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("sorted result file")
                .takes_value(true)
                .default_value("output.sorted.txt"),
        )
        .arg(
            clap::Arg::new("capacity")
                .short('c')
                .long("capacity")
                .help("number of samples sorted in memory and written per run")
                .takes_value(true)
                .default_value("1000")
                .validator(validate_positive),
        )
        .arg(
            clap::Arg::new("run_dir")
                .short('r')
                .long("run-dir")
                .help("directory runs are written to and kept in")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary runs")
                .takes_value(true)
                .conflicts_with("run_dir"),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .short('b')
                .long("rw-buf-size")
                .help("run and output file read/write buffer size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Buffer size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("max_retries")
                .short('m')
                .long("max-retries")
                .help("consecutive invalid input lines tolerated before input is considered closed")
                .takes_value(true)
                .default_value("50")
                .validator(validate_positive),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn validate_positive(value: &str) -> Result<(), String> {
    match value.parse::<usize>() {
        Ok(0) => Err("value must be greater than zero".to_string()),
        Ok(_) => Ok(()),
        Err(err) => Err(format!("number format incorrect: {}", err)),
    }
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
