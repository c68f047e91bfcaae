mod cli;
mod config;
mod dashboard;
mod deploy;
mod deployer;
mod exec;
mod nginx;
mod output;
mod registry;
mod source;
mod systemd;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::SystemPaths;
use deploy::context::Services;
use output::{Live, Plain, Reporter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .without_time()
        .init();

    let reporter: Arc<dyn Reporter> = if console::Term::stdout().is_term() {
        Arc::new(Live)
    } else {
        Arc::new(Plain)
    };

    // An interrupt during a long-running operation is a clean exit; an
    // in-flight step is not guaranteed to be rolled back.
    let outcome = tokio::select! {
        outcome = dispatch(cli.command, reporter.clone()) => outcome,
        _ = tokio::signal::ctrl_c() => {
            reporter.warning("Interrupted");
            return;
        }
    };

    if let Err(err) = outcome {
        reporter.error(&format!("{:#}", err));
        std::process::exit(1);
    }
}

async fn dispatch(command: Command, reporter: Arc<dyn Reporter>) -> Result<()> {
    let services = Services::new(SystemPaths::default(), reporter);

    match command {
        Command::Add {
            domain,
            source,
            port,
            app_type,
            branch,
            no_ssl,
            build_command,
            start_command,
            env,
        } => {
            cli::add::run(
                &services,
                domain,
                source,
                port,
                app_type,
                branch,
                !no_ssl,
                build_command,
                start_command,
                env,
            )
            .await?;
        }

        Command::Remove {
            domain,
            no_backup,
            yes,
        } => {
            cli::remove::run(&services, &domain, !no_backup, yes).await?;
        }

        Command::List { detailed } => {
            cli::list::run(&services, detailed).await?;
        }

        Command::Restart { domain } => {
            deploy::restart(&services, &domain).await?;
        }

        Command::Update { domain } => {
            services.check_prerequisites().await?;
            deploy::update::run(&services, &domain).await?;
        }

        Command::Logs {
            domain,
            lines,
            follow,
        } => {
            cli::logs::run(&services, &domain, lines, follow).await?;
        }

        Command::Ssl { domain, email } => {
            let mut record = services.store.get_app(&domain)?;
            if let Some(ref email) = email {
                config::validate::validate_email(email)?;
            }
            services.setup_ssl(&domain, email.as_deref()).await?;
            if !record.ssl {
                record.ssl = true;
                record.touch();
                services.store.update_app(record)?;
            }
        }

        Command::Diagnose { domain } => {
            let issues = match domain {
                Some(ref domain) => deploy::diagnose::app(&services, domain).await?,
                None => deploy::diagnose::system(&services).await,
            };

            if issues.is_empty() {
                services.reporter.success("No problems found");
            } else {
                services.reporter.header("Problems found");
                for issue in &issues {
                    services.reporter.error(issue);
                }
                if let Some(domain) = domain {
                    services.reporter.header("Suggestions");
                    services
                        .reporter
                        .info(&format!("Check logs:   deckhand logs --domain {}", domain));
                    services
                        .reporter
                        .info(&format!("Restart:      deckhand restart --domain {}", domain));
                    services
                        .reporter
                        .info(&format!("Update:       deckhand update --domain {}", domain));
                    services.reporter.info("Check nginx:  sudo nginx -t");
                }
                anyhow::bail!("{} problem(s) found", issues.len());
            }
        }

        Command::Repair { domain } => {
            deploy::repair::run(&services, &domain).await?;
        }

        Command::Status { domain } => {
            cli::status::run(&services, domain.as_deref()).await?;
        }

        Command::Export { file } => {
            cli::transfer::export(&services, &file)?;
        }

        Command::Import { file, yes } => {
            cli::transfer::import(&services, &file, yes)?;
        }

        Command::Types => {
            cli::detect::types(&services)?;
        }

        Command::Detect { directory } => {
            cli::detect::detect(&services, &directory)?;
        }

        Command::Maintenance {
            domain,
            enable,
            disable,
        } => {
            cli::maintenance::run(&services, &domain, enable, disable).await?;
        }

        Command::Gui { host, port } => {
            dashboard::serve(services.paths.clone(), &host, port).await?;
        }

        Command::FixConfig { file } => {
            cli::fix_config::run(&services, file).await?;
        }
    }

    Ok(())
}
