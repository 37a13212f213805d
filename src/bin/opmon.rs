use anyhow::Result;

fn main() -> Result<()> {
    opmon::cli::run()
}
