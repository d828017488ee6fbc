use anyhow::Result;

fn main() -> Result<()> {
    let registry = capbox::scenarios::builtin()?;
    capbox::cli::run(&registry)
}
