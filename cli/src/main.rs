use httptap_core::config::{load_config, Level, Mode, Options};
use httptap_core::filter::IntSet;
use httptap_core::runtime::Runtime;

use anyhow::Result;
use clap::Parser;

/// Capture and dump HTTP/1.x traffic from network devices or pcap files.
#[derive(Parser, Debug)]
#[command(name = "httptap", version, about)]
struct Args {
    /// TOML config file; flags given on the command line override it
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Output level: url, header, or all
    #[arg(long)]
    level: Option<Level>,

    /// Connection processing engine: fast or pair
    #[arg(long)]
    mode: Option<Mode>,

    /// Interface name or pcap file. `any` captures on every interface
    #[arg(short = 'i', long)]
    input: Option<String>,

    /// Filter by ip; if either src or dst ip matches, the packet is processed
    #[arg(long)]
    ip: Option<String>,

    /// Filter by port; if either src or dst port matches, the packet is processed
    #[arg(long)]
    port: Option<String>,

    /// Customized BPF; if set, --ip and --port are suppressed
    #[arg(long)]
    bpf: Option<String>,

    /// Filter by request host, wildcard match (*, ?)
    #[arg(long)]
    host: Option<String>,

    /// Filter by request url path, wildcard match (*, ?)
    #[arg(long)]
    uri: Option<String>,

    /// Filter by request method, multiple by comma
    #[arg(long)]
    method: Option<String>,

    /// Filter by response status code; ranges allowed, e.g. 200,200-300
    #[arg(long)]
    status: Option<IntSet>,

    /// Print responses as well as requests
    #[arg(long)]
    resp: bool,

    /// Force print unknown content-type body as text
    #[arg(long)]
    force: bool,

    /// Output an equivalent curl command for each request
    #[arg(long)]
    curl: bool,

    /// One JSON object per message instead of text records
    #[arg(long)]
    json: bool,

    /// Output EOF connection sentinels (default true)
    #[arg(long, action = clap::ArgAction::Set)]
    eof: Option<bool>,

    /// Dump body to files with this prefix, `prefix` or `prefix:max`
    #[arg(long)]
    dump_body: Option<String>,

    /// Seconds without traffic before a connection is evicted
    #[arg(long)]
    idle: Option<u64>,

    /// Max records captured before exit; 0 is unlimited
    #[arg(short = 'n', long = "n")]
    n: Option<i32>,

    /// Rate limit output records per second
    #[arg(long)]
    rate: Option<f64>,

    /// Uniform sampling ratio in [0, 1]
    #[arg(long)]
    src_ratio: Option<f64>,

    /// Channel size to buffer tcp segments
    #[arg(long)]
    chan: Option<usize>,

    /// Output channel size to buffer records
    #[arg(long)]
    out_chan: Option<usize>,

    /// File output (date template + :append/:NNNm suffixes), replay http
    /// address, or stdout/stderr; repeatable
    #[arg(short = 'o', long)]
    output: Vec<String>,

    /// Start a web server streaming transactions over SSE
    #[arg(long)]
    web: bool,

    /// Web server port; 0 picks a free port
    #[arg(long)]
    web_port: Option<u16>,

    /// Web server context path
    #[arg(long)]
    web_context: Option<String>,

    /// Saved record files to replay: glob or directory, `:tail`/`:poll` to follow
    #[arg(short = 'f', long)]
    file: Option<String>,

    /// Verbose replay dump: req, rsp, or all
    #[arg(long)]
    verbose: Option<String>,
}

impl Args {
    /// Overlays explicit flags onto the config-file baseline.
    fn into_options(self) -> Result<Options> {
        let mut options = match &self.config {
            Some(path) => load_config(path)?,
            None => Options::default(),
        };

        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field { options.$field = value; })*
            };
        }
        overlay!(level, mode, input, ip, port, bpf, host, uri, method, status, idle, n, rate, src_ratio, web_port, web_context, file, verbose);

        if let Some(dump_body) = self.dump_body {
            options.dump_body = dump_body;
        }
        if let Some(chan) = self.chan {
            options.chan_size = chan;
        }
        if let Some(out_chan) = self.out_chan {
            options.out_chan_size = out_chan;
        }
        if !self.output.is_empty() {
            options.output = self.output;
        }
        options.resp |= self.resp;
        options.force |= self.force;
        options.curl |= self.curl;
        options.json |= self.json;
        options.web |= self.web;
        if let Some(eof) = self.eof {
            options.eof = eof;
        }
        Ok(options)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let options = args.into_options()?;
    log::info!(
        "options: {}",
        serde_json::to_string(&options).unwrap_or_default()
    );

    let runtime = Runtime::new(options)?;
    runtime.run()
}
