use clap::Parser;
use fixtures::{
    idp::{router, IdpSettings, IdpState},
    require_env_var, run_server, FixtureArgs,
};

/// Identity provider fixture server for running the login app locally
#[derive(Parser, Debug)]
#[clap(name = "idp-fixture")]
struct Cli {
    #[clap(flatten)]
    common: FixtureArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let defaults = IdpSettings::default();
    let settings = IdpSettings {
        client_id: require_env_var("IDP_CLIENT_ID", &defaults.client_id, args.common.force)?,
        client_secret: require_env_var(
            "IDP_CLIENT_SECRET",
            &defaults.client_secret,
            args.common.force,
        )?,
        ..defaults
    };

    let state = IdpState::new(settings, args.common.base_url())?;

    run_server(args.common, router(state)).await
}
