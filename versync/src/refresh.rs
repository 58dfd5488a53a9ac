use crate::{
    application::{and_cleanup, Session},
    options::{parse_variant, DesiredArgs, StoreArgs},
    state,
};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use versync_core::{ObservedState, ServiceId, ServiceVariant, VersionNumber};
use versync_engine::RunOptions;

#[derive(clap::Args, Debug)]
pub(crate) struct Args {
    #[command(flatten)]
    desired: DesiredArgs,

    #[command(flatten)]
    store: StoreArgs,

    /// Read this version instead of the active one
    #[arg(long)]
    at_version: Option<u32>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ShowArgs {
    /// Observed-state event log
    #[arg(long, default_value = "versync-state.json")]
    state: PathBuf,

    /// Only show this service
    #[arg(long)]
    service: Option<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct InitArgs {
    /// Identifier of the new service
    #[arg(long)]
    service: String,

    /// `vcl` or `compute`
    #[arg(long, value_parser = parse_variant, default_value = "vcl")]
    variant: ServiceVariant,

    #[command(flatten)]
    store: StoreArgs,
}

/// Run the `refresh` command.
pub(crate) async fn refresh(args: &Args) -> Result<()> {
    let mut session = Session::open(&args.store)?;
    let result: Result<()> = async {
        // The desired file only supplies which sticky fields were set.
        let (service, desired) = args.desired.load(&session.registry, true)?;
        let coordinator = session.coordinator(RunOptions::default());
        let observed = session
            .refresh(
                &coordinator,
                &service,
                args.at_version.map(VersionNumber),
                &desired,
                "refresh",
            )
            .await?;
        eprint!("{}", render_observed(&observed));
        Ok(())
    }
    .await;
    and_cleanup(result, session.close())
}

/// Run the `show` command.
pub(crate) fn show(args: &ShowArgs) -> Result<()> {
    let (document, _) = state::read_document(&args.state)?;
    let output = match &args.service {
        Some(service) => {
            let service = ServiceId::new(service.as_str());
            match state::observed_in(&document, &service)? {
                Some(observed) => serde_json::to_value(observed)?,
                None => bail!("no observed state recorded for {}", service),
            }
        }
        None => document
            .get("services")
            .cloned()
            .context("state document has no services")?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run the `init` command: create a service in the emulated remote.
pub(crate) fn init(args: &InitArgs) -> Result<()> {
    let session = Session::open(&args.store)?;
    let service = ServiceId::new(args.service.as_str());
    let remote = session.local.remote();
    if remote.active_version(&service).is_some() {
        bail!("service {} already exists", service);
    }
    let version = remote.add_service(&service, args.variant);
    eprintln!(
        "Created {} service {} at version {}",
        args.variant, service, version
    );
    session.close()
}

fn render_observed(observed: &ObservedState) -> String {
    let version = observed
        .version
        .map_or_else(|| "none".to_string(), |v| v.to_string());
    let mut out = format!(
        "{} ({}) version {}\n",
        observed.service, observed.variant, version
    );
    for (kind, elements) in &observed.kinds {
        out.push_str(&format!("  {}: {}\n", kind, elements.len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use versync_core::{Element, ElementSet, Kind};

    use super::*;

    #[test]
    fn renders_counts_per_kind() {
        let mut observed = ObservedState::empty(ServiceId::new("svc"), ServiceVariant::Vcl);
        observed.version = Some(VersionNumber(4));
        observed.set(
            Kind::Condition,
            ElementSet::from_elements(
                Kind::Condition,
                vec![Element::new("a"), Element::new("b")],
            )
            .unwrap(),
        );
        observed.set(Kind::Backend, ElementSet::new());
        assert_eq!(
            render_observed(&observed),
            "svc (vcl) version 4\n  condition: 2\n  backend: 0\n"
        );
    }
}
