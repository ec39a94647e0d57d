use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("pulse")
        .about("Metrics polling runtime for appliance monitoring")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("poller")
                .short('p')
                .long("poller")
                .help("Poller name as defined in config")
                .env("PULSE_POLLER")
                .required(true),
        )
        .arg(
            Arg::new("daemon")
                .long("daemon")
                .help("Start as daemon")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Debug mode, no data will be exported")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("loglevel")
                .short('l')
                .long("loglevel")
                .help("Logging level (0=trace, 1=debug, 2=info, 3=warning, 4=error, 5=critical)")
                .default_value("2")
                .value_parser(clap::value_parser!(u8).range(0..=5)),
        )
        .arg(
            Arg::new("profiling")
                .long("profiling")
                .help("If set, expose a profiling endpoint on this port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("promPort")
                .long("promPort")
                .help("Port handed to prometheus-style exporters")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Config file path")
                .env("PULSE_CONFIG")
                .default_value("pulse.yml"),
        )
        .arg(
            Arg::new("collectors")
                .short('c')
                .long("collectors")
                .help("Only start these collectors (overrides config)")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("objects")
                .short('o')
                .long("objects")
                .help("Only start these objects (overrides collector template)")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
}
