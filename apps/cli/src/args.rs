use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ingest,
    Record,
    Report,
    Summary,
    Daily,
    Transactions,
    Latency,
    Quota(QuotaCommand),
    Pricing(PricingCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCommand {
    Check,
    Set,
    Clear,
    List,
    State,
    Purge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingCommand {
    List,
    Resolve(String),
}

#[derive(Debug, Default)]
pub struct CliArgs {
    pub command: Option<Command>,
    pub data_dir: Option<PathBuf>,
    pub top: Option<usize>,
    pub days: Option<u32>,
    pub dimension: Option<String>,
    pub subject: Option<String>,
    pub at: Option<String>,
    pub daily_tokens: Option<u64>,
    pub daily_messages: Option<u64>,
    pub monthly_budget: Option<f64>,
    pub help: bool,
}

impl CliArgs {
    pub fn require_subject(&self) -> Result<&str, String> {
        self.subject
            .as_deref()
            .ok_or_else(|| "missing --subject".to_string())
    }
}

pub fn parse_args() -> Result<CliArgs, String> {
    parse_from(env::args().skip(1))
}

pub fn parse_from<I>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut parsed = CliArgs::default();
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("missing value for {name}"))
        };
        match arg.as_str() {
            "--data-dir" => parsed.data_dir = Some(PathBuf::from(value("--data-dir")?)),
            "--top" => parsed.top = Some(number("--top", &value("--top")?)?),
            "--days" => parsed.days = Some(number("--days", &value("--days")?)?),
            "--dimension" => parsed.dimension = Some(value("--dimension")?),
            "--subject" => parsed.subject = Some(value("--subject")?),
            "--at" => parsed.at = Some(value("--at")?),
            "--daily-tokens" => {
                parsed.daily_tokens = Some(number("--daily-tokens", &value("--daily-tokens")?)?)
            }
            "--daily-messages" => {
                parsed.daily_messages =
                    Some(number("--daily-messages", &value("--daily-messages")?)?)
            }
            "--monthly-budget" => {
                parsed.monthly_budget =
                    Some(number("--monthly-budget", &value("--monthly-budget")?)?)
            }
            "--help" | "-h" => parsed.help = true,
            flag if flag.starts_with("--") => {
                return Err(format!("unknown argument: {arg}"));
            }
            _ => positional.push(arg.clone()),
        }
    }

    if !positional.is_empty() {
        parsed.command = Some(command(&positional)?);
    }
    Ok(parsed)
}

fn command(words: &[String]) -> Result<Command, String> {
    let words = words.iter().map(String::as_str).collect::<Vec<_>>();
    let command = match words.as_slice() {
        ["ingest"] => Command::Ingest,
        ["record"] => Command::Record,
        ["report"] => Command::Report,
        ["summary"] => Command::Summary,
        ["daily"] => Command::Daily,
        ["transactions"] => Command::Transactions,
        ["latency"] => Command::Latency,
        ["quota", "check"] => Command::Quota(QuotaCommand::Check),
        ["quota", "set"] => Command::Quota(QuotaCommand::Set),
        ["quota", "clear"] => Command::Quota(QuotaCommand::Clear),
        ["quota", "list"] => Command::Quota(QuotaCommand::List),
        ["quota", "state"] => Command::Quota(QuotaCommand::State),
        ["quota", "purge"] => Command::Quota(QuotaCommand::Purge),
        ["pricing", "list"] => Command::Pricing(PricingCommand::List),
        ["pricing", "resolve", model] => Command::Pricing(PricingCommand::Resolve(model.to_string())),
        _ => return Err(format!("unknown command: {}", words.join(" "))),
    };
    Ok(command)
}

fn number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {name} value: {value}"))
}

pub fn print_help() {
    println!(
        "Usage Meter CLI\n\n\
Usage:\n  usage-meter [--data-dir <dir>] <command> [options]\n\n\
Commands:\n  ingest                      Read new lines from the events directory\n  record                      Record JSON usage events from stdin\n  report                      Top buckets for one dimension\n  summary                     Totals across all usage\n  daily                       Day buckets, oldest first\n  transactions                Priced events with their price source\n  latency                     Estimated time to first token\n  quota check|state           Quota status for --subject\n  quota set|clear             Edit limits for --subject\n  quota list                  Subjects with limits\n  quota purge                 Drop quota buckets past retention\n  pricing list                Catalog entries\n  pricing resolve <model>     Show how a model id is priced\n\n\
Options:\n  --data-dir <dir>            Override the data directory for this run\n  --top <n>                   Number of buckets in a report\n  --days <n>                  Window in UTC days\n  --dimension <name>          model, subject or day\n  --subject <id>              Subject for quota commands\n  --at <rfc3339>              Evaluate quota at this instant\n  --daily-tokens <n>          Daily token limit (quota set)\n  --daily-messages <n>        Daily message limit (quota set)\n  --monthly-budget <usd>      Monthly budget (quota set)\n  -h, --help                  Show this help message\n"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(words: &[&str]) -> Result<CliArgs, String> {
        parse_from(words.iter().map(|word| word.to_string()))
    }

    #[test]
    fn parses_report_overrides() {
        let args = parse(&["report", "--dimension", "subject", "--top", "5", "--days", "7"])
            .expect("args");
        assert_eq!(args.command, Some(Command::Report));
        assert_eq!(args.dimension.as_deref(), Some("subject"));
        assert_eq!(args.top, Some(5));
        assert_eq!(args.days, Some(7));
    }

    #[test]
    fn parses_nested_commands() {
        let args = parse(&["--data-dir", "/tmp/meter", "quota", "set", "--subject", "u1"])
            .expect("args");
        assert_eq!(args.command, Some(Command::Quota(QuotaCommand::Set)));
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/meter")));
        assert_eq!(args.require_subject(), Ok("u1"));

        let args = parse(&["pricing", "resolve", "gpt-4.1"]).expect("args");
        assert_eq!(
            args.command,
            Some(Command::Pricing(PricingCommand::Resolve("gpt-4.1".to_string())))
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--top", "many"]).is_err());
        assert!(parse(&["--days"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["quota", "explode"]).is_err());
        assert!(parse(&["report"]).expect("args").require_subject().is_err());
    }
}
