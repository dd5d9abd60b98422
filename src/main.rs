use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use formwire::context::RunContext;
use formwire::forms::create_module::create_module_form;
use formwire::model::{compile, load_form_spec, validate_form_spec};
use formwire::services::data::{CliDataService, DataService};
use formwire::services::loader::run_to_idle;

const USAGE: &str = "usage:
  formwire check <form.yaml>
  formwire run <form.yaml | create-module> --gateway <cmdline>

Context comes from FORMWIRE_SITE_URL, FORMWIRE_BIZ_ID and
FORMWIRE_CAN_SELECT_BIZ.";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run(env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<()> {
    let mut it = args.into_iter();
    let cmd = it.next().ok_or_else(|| anyhow!(USAGE))?;
    match cmd.as_str() {
        "check" => {
            let path = it.next().ok_or_else(|| anyhow!(USAGE))?;
            let spec = load_form_spec(Path::new(&path))?;
            validate_form_spec(&spec)?;
            compile(&spec, RunContext::from_env())?;
            println!("ok: {} fields", spec.fields.len());
            Ok(())
        }
        "run" => {
            let target = it.next().ok_or_else(|| anyhow!(USAGE))?;
            let mut gateway: Option<String> = None;
            while let Some(a) = it.next() {
                match a.as_str() {
                    "--gateway" => {
                        gateway = Some(
                            it.next()
                                .ok_or_else(|| anyhow!("--gateway needs a command line"))?,
                        )
                    }
                    other => return Err(anyhow!("unknown argument '{other}'\n{USAGE}")),
                }
            }
            let gateway = gateway.ok_or_else(|| anyhow!("run requires --gateway\n{USAGE}"))?;
            let ctx = RunContext::from_env();
            let mut form = if target == "create-module" {
                create_module_form(ctx)?
            } else {
                let spec = load_form_spec(Path::new(&target))?;
                compile(&spec, ctx)?
            };
            let svc: Arc<dyn DataService> = Arc::new(CliDataService::new(gateway));
            let effects = form.init()?;
            run_to_idle(&mut form, &svc, effects)?;
            for n in form.take_notices() {
                eprintln!("notice: {}", n.text);
            }
            println!("{}", serde_json::to_string_pretty(&form.snapshot())?);
            Ok(())
        }
        _ => Err(anyhow!(USAGE)),
    }
}
