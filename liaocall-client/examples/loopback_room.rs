//! Two call sessions in one process, connected over the loopback network.
//!
//! Run with: cargo run --example loopback_room

use liaocall_client::sim::{SimDevices, SimNetwork};
use liaocall_client::{CallClient, CallClientOptions, CallRuntime, MediaConstraints};
use liaocall_types::{Callback, PeerProfile, UserId};
use std::rc::Rc;

fn session(network: &SimNetwork, user: &str) -> CallClient {
    CallClient::new(
        CallClientOptions {
            room_id: "gazebo-demo".to_string(),
            user_id: UserId::from(user),
            profile: PeerProfile::new(user, user, ""),
            peer_id: None,
            constraints: MediaConstraints::audio_video(),
            on_participants_changed: Callback::noop(),
            on_notification: Callback::from(|m: String| println!("[toast] {m}")),
        },
        CallRuntime {
            presence: Rc::new(network.clone()),
            endpoints: Rc::new(network.clone()),
            devices: Rc::new(SimDevices::new()),
        },
    )
}

fn print_room(label: &str, client: &CallClient) {
    println!("{label} sees:");
    for p in client.participants() {
        println!(
            "  {} ({}) muted={} video_off={} screen={} stream={}",
            p.profile.display_name,
            p.peer_id,
            p.is_muted,
            p.is_video_off,
            p.is_screen_sharing,
            p.has_stream(),
        );
    }
}

fn main() -> anyhow::Result<()> {
    let network = SimNetwork::new();

    let mei = session(&network, "mei");
    let juan = session(&network, "juan");

    mei.join()?;
    juan.join()?;
    print_room("mei", &mei);
    print_room("juan", &juan);

    println!("-- mei mutes and shares her screen --");
    mei.set_muted(true);
    mei.start_screen_share()?;
    print_room("juan", &juan);

    println!("-- juan leaves --");
    juan.leave();
    print_room("mei", &mei);

    mei.leave();
    Ok(())
}
