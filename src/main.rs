fn main() -> anyhow::Result<()> {
    cow_cli::run()
}
