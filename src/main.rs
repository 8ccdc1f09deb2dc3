fn main() {
    #[cfg(feature = "cli")]
    beatpatch::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("beatpatch: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
