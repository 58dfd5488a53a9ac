
use crate::{
    application::{and_cleanup, Session},
    options::{DesiredArgs, RunArgs, StoreArgs},
};
use anyhow::Result;
use tracing::warn;
use versync_engine::{InterruptState, Phase, Plan, RunOptions};

#[derive(clap::Args, Debug)]
pub(crate) struct PlanArgs {
    #[command(flatten)]
    desired: DesiredArgs,

    #[command(flatten)]
    store: StoreArgs,

    /// Diff against the last recorded observed state instead of reading the service
    #[arg(long, default_value_t = false)]
    no_refresh: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct Args {
    #[command(flatten)]
    desired: DesiredArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    run: RunArgs,

    /// Diff against the last recorded observed state instead of reading the service
    #[arg(long, default_value_t = false)]
    no_refresh: bool,
}

/// Run the `plan` command.
pub(crate) async fn plan(args: &PlanArgs) -> Result<()> {
    let mut session = Session::open(&args.store)?;
    let (service, desired) = args.desired.load(&session.registry, false)?;
    let coordinator = session.coordinator(RunOptions::default());
    let observed = if args.no_refresh {
        session
            .observed(&coordinator, &service, &desired, true)
            .await?
    } else {
        // a plan only looks; keep the log for commands that change things
        coordinator.observe(&service, None, &desired).await?
    };
    let plan = coordinator.plan(&desired, &observed)?;
    print!("{}", render_plan(&plan));
    Ok(())
}

/// Run the `apply` command.
pub(crate) async fn apply(interrupt_state: &InterruptState, args: &Args) -> Result<()> {
    let mut session = Session::open(&args.store)?;
    let result = apply_in(&mut session, interrupt_state, args).await;
    and_cleanup(result, session.close())
}

async fn apply_in(
    session: &mut Session,
    interrupt_state: &InterruptState,
    args: &Args,
) -> Result<()> {
    let (service, desired) = args.desired.load(&session.registry, false)?;
    let coordinator = session.coordinator(args.run.run_options());
    let observed = session
        .observed(&coordinator, &service, &desired, args.no_refresh)
        .await?;

    let plan = coordinator.plan(&desired, &observed)?;
    eprint!("{}", render_plan(&plan));
    if plan.is_empty() {
        return Ok(());
    }

    let outcome = coordinator.run(&desired, &observed, interrupt_state).await;

    // The active version may have changed even if the run failed halfway.
    let refreshed = session
        .refresh(&coordinator, &service, None, &desired, "apply")
        .await;

    if let Err(e) = &refreshed {
        warn!("could not record the state after applying: {:#}", e);
    }
    let report = outcome?;
    let target = report
        .target_version
        .map_or_else(|| "?".to_string(), |v| v.to_string());
    match report.phase {
        Phase::Active => eprintln!("Activated version {} of {}", target, service),
        Phase::Staged => eprintln!(
            "Version {} of {} is validated and left inactive",
            target, service
        ),
        Phase::Abandoned => eprintln!("Dry run: version {} of {} was abandoned", target, service),
        _ => {}
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Human-readable list of what a plan would change, one line per entry.
pub(crate) fn render_plan(plan: &Plan) -> String {
    if plan.is_empty() {
        return format!("{} ({}): no changes\n", plan.service, plan.variant);
    }
    let mut lines = vec![format!(
        "{} ({}): {}",
        plan.service,
        plan.variant,
        plan.summary()
    )];
    for (kind, changeset) in &plan.changesets {
        lines.push(format!("  {}: {}", kind, changeset.summary()));
        lines.extend(changeset.create.iter().map(|e| format!("    + {}", e.name)));
        lines.extend(changeset.update.iter().map(|(name, update)| {
            let fields: Vec<&str> = update.changed.iter().map(String::as_str).collect();
            format!("    ~ {} ({})", name, fields.join(", "))
        }));
        lines.extend(changeset.delete.iter().map(|e| format!("    - {}", e.name)));
    }
    lines.iter().map(|line| format!("{}\n", line)).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use versync_core::{
        Changeset, Element, ElementUpdate, Kind, ServiceId, ServiceVariant, Setting,
    };

    use super::*;

    #[test]
    fn renders_each_change() {
        let mut changeset = Changeset::new(Kind::Backend);
        changeset.create.push(Element::new("new"));
        changeset.update.insert(
            "origin".to_string(),
            ElementUpdate {
                desired: Element::new("origin").with("port", Setting::int(443)),
                id: None,
                changed: ["port".to_string(), "weight".to_string()].into(),
            },
        );
        changeset.delete.push(Element::new("old"));
        let mut changesets = BTreeMap::new();
        changesets.insert(Kind::Backend, changeset);
        let plan = Plan {
            service: ServiceId::new("svc"),
            variant: ServiceVariant::Vcl,
            changesets,
        };
        assert_eq!(
            render_plan(&plan),
            "svc (vcl): +1 ~1 -1\n  backend: +1 ~1 -1\n    + new\n    ~ origin (port, weight)\n    - old\n"
        );
    }

    #[test]
    fn renders_empty_plan() {
        let plan = Plan {
            service: ServiceId::new("svc"),
            variant: ServiceVariant::Compute,
            changesets: BTreeMap::new(),
        };
        assert_eq!(render_plan(&plan), "svc (compute): no changes\n");
    }
}
