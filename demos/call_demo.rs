//! Call Demo
//!
//! Registers with a signaling server and either calls a peer or waits for
//! incoming calls, printing every session event. Media is simulated.
//!
//! ```text
//! cargo run --example call_demo -- ws://localhost:8443/call alice [bob]
//! ```

use anyhow::{Context, Result};
use rtcall::{
    async_trait, init_logging, CallState, Event, GlobalConfig, IceCandidate, MediaStack,
    RegistrationState, RtCall, RtCallError,
};
use std::time::Duration;

/// Stand-in for a real WebRTC stack
struct SimulatedMedia {
    calls: u32,
}

#[async_trait]
impl MediaStack for SimulatedMedia {
    async fn generate_offer(&mut self) -> Result<String, RtCallError> {
        self.calls += 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.calls
        ))
    }

    async fn process_answer(&mut self, sdp_answer: &str) -> Result<(), RtCallError> {
        if sdp_answer.starts_with("v=0") {
            Ok(())
        } else {
            Err(RtCallError::MediaStack {
                reason: "answer is not an SDP document".to_string(),
            })
        }
    }

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), RtCallError> {
        println!("   🧊 remote candidate {}", candidate.candidate);
        Ok(())
    }

    async fn dispose(&mut self) {
        println!("   🔇 media released");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(std::env::var("RTCALL_DEBUG").is_ok())?;

    let mut args = std::env::args().skip(1);
    let server_url = args
        .next()
        .unwrap_or_else(|| "ws://localhost:8443/call".to_string());
    let identity = args.next().unwrap_or_else(|| "alice".to_string());
    let callee = args.next();

    println!("📞 rtcall demo");
    println!("   server:   {}", server_url);
    println!("   identity: {}", identity);

    let rtcall = RtCall::init_with(GlobalConfig {
        debug_logging: false,
        default_signaling_url: Some(server_url.clone()),
    })?;

    let mut client = rtcall
        .client(&identity)
        .keep_alive(Some(Duration::from_secs(15)))
        .connect(SimulatedMedia { calls: 0 })
        .await
        .with_context(|| format!("connecting to {}", server_url))?;
    let mut events = client.events().context("event stream already taken")?;

    client.register().await.context("sending register")?;

    loop {
        let event = tokio::select! {
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("👋 shutting down");
                break;
            }
        };
        println!("📨 {}: {:?}", event.event_type(), event);

        match event {
            Event::RegistrationStateChanged {
                state: RegistrationState::Registered,
            } => {
                if let Some(callee) = callee.as_deref() {
                    println!("➡️  calling {}", callee);
                    if let Err(e) = client.place_call(callee).await {
                        println!("❌ call failed: {}", e);
                    }
                }
            }
            Event::CallStateChanged {
                state: CallState::ProcessingCall,
            } => {
                // A real stack reports these as ICE gathering progresses
                for (index, host) in ["192.168.1.10", "10.0.0.5"].iter().enumerate() {
                    let line = format!(
                        "candidate:{} 1 udp 2122260223 {} 500{} typ host",
                        index, host, index
                    );
                    let candidate = IceCandidate::new(line, "0", 0);
                    client.add_local_candidate(candidate).await?;
                }
            }
            Event::IncomingCall { caller_id, .. } => {
                println!("🔔 {} is calling, accepting", caller_id);
                if let Err(e) = client.accept().await {
                    println!("❌ could not accept: {}", e);
                }
            }
            Event::CallEstablished { peer_id, .. } => {
                println!("✅ in call with {}, hanging up in 5s", peer_id);
                tokio::time::sleep(Duration::from_secs(5)).await;
                // The peer may have hung up first
                if let Err(e) = client.hangup().await {
                    println!("   hangup skipped: {}", e);
                }
            }
            Event::Disconnected { .. } => break,
            _ => {}
        }
    }

    client.close().await?;
    println!("🎉 done");
    Ok(())
}
