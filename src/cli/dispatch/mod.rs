use anyhow::Result;

use crate::cli::actions::Action;
use crate::options::Options;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Run {
        options: Box::new(Options::from_matches(matches)),
    })
}
