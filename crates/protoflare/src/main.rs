use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use protoflare::common::{
    AtIdentifier, Cancellable, CancellationToken, Did, FileStore, HttpClientExt,
};
use protoflare::identity::{IdentityResolver, ProtoflareResolver, ResolverOptions};
use protoflare::oauth::{CallbackParams, ClientConfig, CredentialRepository, OAuthClient};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Protoflare - AT Protocol OAuth client")]
struct Args {
    /// Credential store file
    #[arg(long, env = "PROTOFLARE_STORE", default_value = "/tmp/protoflare-store.json")]
    store: PathBuf,

    /// Public base URL of the application (loopback hosts use the development client id)
    #[arg(long, env = "PROTOFLARE_PUBLIC_URL", default_value = "http://localhost:8787")]
    public_url: Url,

    /// Client name shown by the authorization server
    #[arg(long)]
    client_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a handle or DID to its PDS and authorization server
    Resolve { ident: AtIdentifier },
    /// Print the client metadata document
    Metadata,
    /// Start a login and print the URL to open
    Login { ident: AtIdentifier },
    /// Finish a login with the callback URL (or just its query string)
    Callback { redirect: String },
    /// Resume a stored session
    Restore { did: Did },
    /// Delete stored credentials
    Logout { did: Did },
}

type Client = OAuthClient<Cancellable<reqwest::Client>, ProtoflareResolver<Cancellable<reqwest::Client>>>;

fn build_client(args: &Args, token: CancellationToken) -> Client {
    let http = reqwest::Client::new().with_cancellation(token);
    let resolver = ProtoflareResolver::new(http.clone(), ResolverOptions::default());
    let config = ClientConfig::new(args.public_url.clone())
        .maybe_client_name(args.client_name.as_deref())
        .build();
    OAuthClient::new(
        http,
        resolver,
        CredentialRepository::new(FileStore::new(&args.store)),
        config,
    )
}

fn callback_params(redirect: &str) -> miette::Result<CallbackParams> {
    if redirect.contains("://") {
        let url = Url::parse(redirect).into_diagnostic()?;
        Ok(CallbackParams::from_url(&url)?)
    } else {
        Ok(CallbackParams::from_query(redirect)?)
    }
}

async fn run(args: Args, client: Client) -> miette::Result<()> {
    match args.command {
        Command::Resolve { ident } => {
            let resolved = client.resolver().resolve_identity(&ident).await?;
            println!("did:      {}", resolved.did);
            println!("handle:   {}", resolved.display_handle());
            println!("pds:      {}", resolved.endpoints.pds);
            println!("auth:     {}", resolved.endpoints.authorization_server);
        }
        Command::Metadata => {
            println!("{}", client.client_metadata().to_pretty_json().into_diagnostic()?);
        }
        Command::Login { ident } => {
            let url = client.authorize(&ident).await?;
            println!("open this URL to log in:\n\n{url}\n");
            println!("redirects to {}", client.redirect_uri());
        }
        Command::Callback { redirect } => {
            let params = callback_params(&redirect)?;
            let (user, api) = client.exchange(&params).await?;
            println!("logged in as {user}");
            api.flush().await;
        }
        Command::Restore { did } => {
            let (user, mut api) = client.restore(&did).await?;
            let session = api
                .xrpc_query("com.atproto.server.getSession", &Vec::<(&str, &str)>::new())
                .await;
            // nonce writes may be pending even when the call failed
            api.flush().await;
            println!("restored {user}");
            println!("{}", serde_json::to_string_pretty(&session?).into_diagnostic()?);
        }
        Command::Logout { did } => {
            client.logout(&did).await?;
            println!("logged out {did}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let token = CancellationToken::new();
    let client = build_client(&args, token.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling in-flight requests");
            token.cancel();
        }
    });
    run(args, client).await
}
