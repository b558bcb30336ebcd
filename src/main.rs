use std::time;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use log::info;

use tunmtu::options::{Compression, Options, Proto, TlsRole};
use tunmtu::overhead::advertised_link_mtu;
use tunmtu::session::{init_frame, Session};

/// Compute the MTU budget of a tunnel, optionally probing the path to a peer.
#[derive(Parser)]
#[command(name = "tunmtu")]
struct Cli {
    #[arg(long, value_enum, default_value = "udp")]
    proto: Proto,
    /// Connect through a SOCKS proxy
    #[arg(long)]
    socks_proxy: bool,
    #[arg(long, value_enum)]
    tls: Option<TlsRole>,
    /// Static key mode
    #[arg(long)]
    secret: bool,
    #[arg(long)]
    peer_id: bool,
    /// Disable replay protection
    #[arg(long)]
    no_replay: bool,
    #[arg(long, default_value = "BF-CBC")]
    cipher: String,
    #[arg(long, default_value = "SHA1")]
    auth: String,
    #[arg(long, value_enum, default_value = "none")]
    compress: Compression,
    #[arg(long)]
    fragment: Option<usize>,
    #[arg(long, conflicts_with = "link_mtu")]
    tun_mtu: Option<usize>,
    #[arg(long)]
    link_mtu: Option<usize>,
    #[arg(long)]
    tun_mtu_extra: Option<usize>,
    /// yes, maybe or no
    #[arg(long)]
    mtu_disc: Option<String>,

    /// Send probes to this address and report the discovered MTU
    #[arg(long)]
    probe: Option<String>,
    #[arg(long, default_value_t = 5)]
    probe_rounds: usize,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            proto: self.proto,
            socks_proxy: self.socks_proxy,
            tls: self.tls,
            shared_secret: self.secret,
            use_peer_id: self.peer_id,
            replay: !self.no_replay,
            ciphername: self.cipher.clone(),
            authname: self.auth.clone(),
            compression: self.compress,
            fragment: self.fragment,
            tun_mtu: self.tun_mtu,
            link_mtu: self.link_mtu,
            tun_mtu_extra: self.tun_mtu_extra,
            mtu_discover: self.mtu_disc.clone(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    simple_logger::SimpleLogger::new()
        .with_level(cli.verbose.log_level_filter())
        .init()?;

    let options = cli.options();
    let frame = init_frame(&options)?;
    println!("frame: {}", frame);
    println!("tun mtu: {}", frame.tun_mtu());
    println!("advertised link mtu: {}", advertised_link_mtu(&options, &frame)?);

    if let Some(remote_addr) = &cli.probe {
        let mut session = Session::open(options, remote_addr.as_str())?;
        let link_mtu = session.probe(cli.probe_rounds, time::Duration::from_secs(1))?;
        info!("Probe finished: {}", session.frame);
        println!("dynamic link mtu: {}", link_mtu);
        println!("dynamic tun mtu: {}", session.frame.tun_mtu_dynamic());
    }

    Ok(())
}
