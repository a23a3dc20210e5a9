//! Terminal rendering of session events

use fshare_core::ShareEvent;
use fshare_core::util::format_size;
use std::time::SystemTime;

pub struct EventPrinter {
    transfers: u32,
    /// Also show per-connection chatter
    verbose: bool,
}

impl EventPrinter {
    pub fn new(verbose: bool) -> Self {
        Self {
            transfers: 0,
            verbose,
        }
    }

    pub fn print(&mut self, event: &ShareEvent) {
        match event {
            ShareEvent::SessionReady {
                file_name,
                file_size,
                local_url,
                status_url,
                public_url,
                password,
                ..
            } => {
                println!("Sharing {} ({})", file_name, format_size(*file_size));
                println!("  Local:  {}", local_url);
                if let Some(url) = public_url {
                    println!("  Public: {}", url);
                }
                println!("  Status: {}", status_url);
                if let Some(password) = password {
                    println!("  Password: {}", password);
                }

                let flag = password
                    .as_ref()
                    .map(|p| format!(" --password {}", p))
                    .unwrap_or_default();
                if let Some((host, port)) = host_port(local_url) {
                    println!("\nOn the same network:\n  fshare receive {} {} {}{}", host, port, quoted(file_name), flag);
                }
                if let Some(url) = public_url {
                    println!("From anywhere:\n  fshare get {} {}{}", url, quoted(file_name), flag);
                }
                println!("\nPress Ctrl-C to stop sharing.");
            }

            ShareEvent::TunnelReady { endpoint } => {
                tracing::debug!("Tunnel ready at {}", endpoint.url);
            }

            ShareEvent::TunnelUnavailable { reason } => {
                println!("Warning: global sharing unavailable ({}), local network only", reason);
            }

            ShareEvent::ClientConnected { peer } => println!("Connection from {}", peer),

            ShareEvent::ClientAuthenticated { client_name, .. } => {
                println!("{} is downloading...", client_name);
            }

            ShareEvent::ClientRejected { peer, client_name } => {
                println!("Rejected {} ({}): wrong password", client_name, peer);
            }

            ShareEvent::TransferCompleted {
                client_name,
                save_path,
                bytes,
                expires_at,
            } => {
                self.transfers += 1;
                println!(
                    "Sent {} to {} (saved as {}). Transfers so far: {}",
                    format_size(*bytes),
                    client_name,
                    save_path,
                    self.transfers
                );
                let minutes = expires_at
                    .duration_since(SystemTime::now())
                    .map(|d| d.as_secs().div_ceil(60))
                    .unwrap_or(0);
                println!("Session stays open for another {} min", minutes);
            }

            ShareEvent::ProtocolViolation { peer, violation } => {
                if self.verbose {
                    println!("Protocol violation from {}: {}", peer, violation);
                }
            }

            ShareEvent::ConnectionClosed {
                peer,
                client_name,
                reason,
            } => {
                if self.verbose {
                    let who = client_name.as_deref().unwrap_or("unidentified client");
                    println!("Connection {} ({}) closed: {}", peer, who, reason);
                }
            }

            ShareEvent::SessionClosed { reason } => println!("Session closed: {}", reason),
        }
    }
}

fn host_port(ws_url: &str) -> Option<(String, String)> {
    let rest = ws_url.strip_prefix("ws://")?.trim_end_matches('/');
    let (host, port) = rest.rsplit_once(':')?;
    Some((host.trim_start_matches('[').trim_end_matches(']').to_string(), port.to_string()))
}

fn quoted(name: &str) -> String {
    if name.contains(char::is_whitespace) {
        format!("\"{}\"", name)
    } else {
        name.to_string()
    }
}
