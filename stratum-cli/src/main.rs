// We put all the code apart from a facade in `cli.rs` so `main` stays a
// one-line entry point.

mod cli;

fn main() -> anyhow::Result<()> {
    cli::main()
}
