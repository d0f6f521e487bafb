use workerlink_cli::run;

fn main() -> anyhow::Result<()> {
    // The worker context spawned by `demo` builds its own current-thread
    // runtime on a separate OS thread; the controller runs on this one.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run())
}
