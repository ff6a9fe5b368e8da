use cliconform_core::Scenario;
use eyre::Result;

/// `--wallet` value: `auto` asks the node, `present`/`absent` override it.
pub fn parse_wallet_mode(s: &str) -> Result<Option<bool>> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Ok(None),
        "present" | "yes" => Ok(Some(true)),
        "absent" | "no" => Ok(Some(false)),
        _ => eyre::bail!("invalid wallet mode: expected 'auto', 'present', or 'absent'"),
    }
}

pub fn parse_scenario_name(s: &str) -> Result<String> {
    match Scenario::from_name(s) {
        Some(scenario) => Ok(scenario.name().to_owned()),
        None => {
            let known: Vec<_> = Scenario::ALL.iter().map(|s| s.name()).collect();
            eyre::bail!("unknown scenario '{s}', expected one of: {}", known.join(", "))
        }
    }
}
