//
//  Sample application.
//
//  Serves an in-memory store on localhost:4918, plain http, no ssl.
//  Connect to http://localhost:4918/dav/
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use futures_util::future::TryFutureExt;
use headers::{authorization::Basic, Authorization, HeaderMapExt};

use storedav::{
    body::Body, DavHandler, ExposedRoot, MemLockRegistry, MemStore, StaticSession,
};

#[derive(Clone)]
struct Server {
    dh: DavHandler,
    auth: bool,
}

impl Server {
    pub fn new(store: Arc<MemStore>, root: ExposedRoot, memls: bool, auth: bool) -> Self {
        let mut config = DavHandler::builder(StaticSession::new(store))
            .strip_prefix("/dav")
            .exposed_root(root);
        if memls {
            config = config.lock_registry(MemLockRegistry::new());
        }

        Server {
            dh: config.build(),
            auth,
        }
    }

    async fn handle(
        &self,
        req: hyper::Request<hyper::Body>,
    ) -> Result<hyper::Response<Body>, Infallible> {
        if !self.auth {
            return Ok(self.dh.handle(req).await);
        }
        // the session is already logged in, we only pick the principal.
        match req.headers().typed_get::<Authorization<Basic>>() {
            Some(Authorization(basic)) => {
                let user = basic.username().to_string();
                Ok(self.dh.handle_with(req, None, Some(user)).await)
            }
            None => {
                let mut response = hyper::Response::new(Body::from("please auth".to_string()));
                *response.status_mut() = hyper::StatusCode::UNAUTHORIZED;
                response.headers_mut().insert(
                    "WWW-Authenticate",
                    hyper::header::HeaderValue::from_static("Basic realm=\"storedav\""),
                );
                Ok(response)
            }
        }
    }
}

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// zone of the in-memory store
    #[arg(short, long, default_value = "tempZone")]
    zone: String,
    /// user the store session runs as
    #[arg(short, long, default_value = "rods")]
    user: String,
    /// expose the whole zone instead of the user's home collection
    #[arg(long)]
    whole_zone: bool,
    /// use ephemeral memory lock registry
    #[arg(short = 'l', long)]
    memls: bool,
    /// require basic authentication
    #[arg(short, long)]
    auth: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let Cli {
        port,
        zone,
        user,
        whole_zone,
        memls,
        auth,
    } = Cli::parse();

    let store = Arc::new(MemStore::new(&zone, &user));
    let root = if whole_zone {
        ExposedRoot::Zone
    } else {
        ExposedRoot::User
    };
    serve(store, root, memls, auth, port).await
}

async fn serve(
    store: Arc<MemStore>,
    root: ExposedRoot,
    memls: bool,
    auth: bool,
    port: u16,
) -> Result<(), Box<dyn Error>> {
    let dav_server = Server::new(store, root, memls, auth);
    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { dav_server.handle(req).await }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))?;
    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {}", e));

    println!("Serving memory store on {}/dav/", port);
    let _ = server.await;
    Ok(())
}
