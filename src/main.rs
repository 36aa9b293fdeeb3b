mod config;
mod dirstream;
mod fs;
mod handle_table;
mod overlay;
mod pathmap;
mod util;

use anyhow::{Context, bail};
use clap::Parser;
use config::{Config, parse_mount_options};
use fs::DefFs;
use fuse3::MountOptions;
use fuse3::path::Session;
#[cfg(unix)]
use futures_util::future::poll_fn;
use log::{LevelFilter, info, warn};
use std::path::PathBuf;
#[cfg(unix)]
use std::pin::Pin;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
#[cfg(unix)]
use tokio::sync::oneshot;

#[derive(Parser, Debug)]
#[command(name = "deffs-rs")]
#[command(about = "Read-only FUSE3 overlay that answers every missing path with a default file")]
struct Cli {
    /// Directory whose contents are exposed through the mount.
    base: PathBuf,

    /// Mount point for the virtual filesystem.
    mountpoint: PathBuf,

    /// Mount options, e.g. `-o deffile=/data/.default,allow_other`.
    #[arg(short = 'o', value_delimiter = ',')]
    options: Vec<String>,

    /// Log every filesystem callback.
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let flags = parse_mount_options(&cli.options)?;
    let config = Config::new(cli.base, flags.require_default_file()?)?;

    if !config.base_path().is_dir() {
        bail!("base path {:?} is not a directory", config.base_path());
    }
    if !config.default_file().exists() {
        warn!(
            "default file {:?} does not exist; missing paths will report ENOENT",
            config.default_file()
        );
    }

    let mut mount_opts = MountOptions::default();
    mount_opts.fs_name("deffs-rs");
    mount_opts.read_only(true);
    mount_opts.allow_other(flags.allow_other);
    mount_opts.nonempty(flags.nonempty);
    mount_opts.default_permissions(flags.default_permissions);

    let mountpoint = cli.mountpoint;
    let fs = DefFs::new(config);
    let session = Session::new(mount_opts);
    let handle = session
        .mount(fs, &mountpoint)
        .await
        .with_context(|| format!("failed to mount at {mountpoint:?}"))?;
    info!("mounted at {mountpoint:?}");

    #[cfg(unix)]
    {
        // Listen for termination signals and unmount cleanly before exiting.
        let (unmount_tx, unmount_rx) = oneshot::channel::<()>();

        let mut mount_task = tokio::spawn(async move {
            let mut handle = Some(handle);
            let mut handle_future = poll_fn(|cx| match handle.as_mut() {
                Some(handle) => Pin::new(handle).poll(cx),
                None => std::task::Poll::Pending,
            });

            let res = tokio::select! {
                res = &mut handle_future => res,
                _ = unmount_rx => match handle.take() {
                    Some(handle) => handle.unmount().await,
                    None => Ok(()),
                }
            };

            res.map_err(anyhow::Error::from)
        });

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let signals = async {
            tokio::select! {
                _ = sigint.recv() => (),
                _ = sigterm.recv() => (),
            }
        };
        tokio::pin!(signals);

        let result = tokio::select! {
            res = &mut mount_task => res,
            _ = &mut signals => {
                info!("signal received, unmounting {mountpoint:?}");
                let _ = unmount_tx.send(());
                mount_task.await
            }
        };

        result??;
    }

    #[cfg(not(unix))]
    {
        handle.await?;
    }

    info!("unmounted {mountpoint:?}");
    Ok(())
}
