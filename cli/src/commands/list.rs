use clap::Args;
use cliconform_core::Scenario;
use eyre::Result;
use serde_json::json;

#[derive(Args)]
pub struct ListArgs {
    #[arg(long, default_value = "human", value_parser = ["json", "human"])]
    pub output: String,
}

pub fn run(args: ListArgs) -> Result<()> {
    match args.output.as_str() {
        "json" => {
            let catalogue: Vec<_> = Scenario::ALL
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name(),
                        "description": s.description(),
                        "preconditions": s.preconditions(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&catalogue)?);
        }
        "human" => {
            for s in Scenario::ALL {
                let pre: Vec<_> = s.preconditions().iter().map(|p| p.name()).collect();
                println!("{:<28} {}", s.name(), s.description());
                if !pre.is_empty() {
                    println!("{:<28} requires: {}", "", pre.join(", "));
                }
            }
        }
        _ => unreachable!(),
    }
    Ok(())
}
