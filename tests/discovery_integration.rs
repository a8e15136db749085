//! Service records flowing from an advertisement into the registry

use std::sync::Arc;

use pretty_assertions::assert_eq;
use uuid::Uuid;

use remotestash::discovery::{
    AddOutcome, Advertisement, DiscoveryEvent, PeerAddress, PeerRecord, Registry, ServiceBrowser,
    ShouldAdd,
};

fn advertisement(name: &str, temporary: bool) -> Advertisement {
    Advertisement {
        id: Uuid::new_v4(),
        name: name.to_string(),
        port: 53211,
        addresses: vec![PeerAddress::parse("192.168.1.20", Some(53211))],
        temporary,
    }
}

fn accept_all() -> ShouldAdd {
    Arc::new(|_: &PeerRecord| true)
}

#[test]
fn test_advertised_record_resolves_to_peer() {
    let ad = advertisement("Office RemoteStash", true);
    let info = ad.service_info().unwrap();

    let record = ServiceBrowser::record_from_service(&info);
    assert_eq!(record.display_name, "Office RemoteStash");
    assert_eq!(record.id, Some(ad.id));
    assert!(record.temporary);
    assert!(record.ready());
    assert_eq!(record.addresses.len(), 1);
    assert_eq!(record.addresses[0].ip.to_string(), "192.168.1.20");
    assert_eq!(record.addresses[0].port, 53211);
}

#[test]
fn test_permanent_flag_is_published() {
    let ad = advertisement("Den", false);
    assert_eq!(
        ad.txt_properties().get("temporary").map(String::as_str),
        Some("no")
    );

    let record = ServiceBrowser::record_from_service(&ad.service_info().unwrap());
    assert!(!record.temporary);
}

#[tokio::test]
async fn test_completion_filters_and_deduplicates() {
    let registry = Registry::new();
    let own = advertisement("Me", true);
    let other = advertisement("Them", true);

    let own_id = own.id;
    let not_self: ShouldAdd = Arc::new(move |record: &PeerRecord| record.id != Some(own_id));

    let own_record = ServiceBrowser::record_from_service(&own.service_info().unwrap());
    let other_record = ServiceBrowser::record_from_service(&other.service_info().unwrap());

    assert_eq!(
        ServiceBrowser::complete(own_record, &registry, &not_self).await,
        AddOutcome::Rejected
    );
    assert_eq!(
        ServiceBrowser::complete(other_record.clone(), &registry, &not_self).await,
        AddOutcome::Added
    );
    assert_eq!(
        ServiceBrowser::complete(other_record, &registry, &not_self).await,
        AddOutcome::Duplicate
    );

    assert_eq!(registry.len().await, 1);
    assert_eq!(registry.current().await.unwrap().display_name, "Them");
}

#[tokio::test]
async fn test_unresolved_record_never_registers() {
    let registry = Registry::new();
    let outcome = ServiceBrowser::complete(PeerRecord::new("Ghost"), &registry, &accept_all()).await;

    assert_eq!(outcome, AddOutcome::NotReady);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_registry_notifies_subscribers() {
    let registry = Registry::new();
    let mut events = registry.subscribe();

    let ad = advertisement("Kitchen", true);
    let record = ServiceBrowser::record_from_service(&ad.service_info().unwrap());
    ServiceBrowser::complete(record, &registry, &accept_all()).await;

    match events.recv().await.unwrap() {
        DiscoveryEvent::PeerAdded(peer) => assert_eq!(peer.display_name, "Kitchen"),
    }
}
