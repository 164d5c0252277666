use server::broker::OutgoingMessage;
use server::broker::memory::InMemoryBroker;
use server::model::ConnectionDescriptor;

pub const DEMO_NAMESPACE: &str = "demo-namespace";

/// In-memory namespace with a little of everything to browse.
pub fn seeded_broker() -> anyhow::Result<(InMemoryBroker, ConnectionDescriptor)> {
    let broker = InMemoryBroker::new();
    let connection = broker.create_namespace(DEMO_NAMESPACE);

    broker.create_queue(DEMO_NAMESPACE, "orders");
    broker.create_queue(DEMO_NAMESPACE, "payments");
    broker.create_subscription(DEMO_NAMESPACE, "events", "audit");
    broker.create_subscription(DEMO_NAMESPACE, "events", "billing");

    for id in 1..=5 {
        let body = format!(r#"{{"orderId":{id},"status":"placed"}}"#);
        broker.seed(
            DEMO_NAMESPACE,
            "orders",
            OutgoingMessage::from_text(&body)
                .with_message_id(format!("order-{id}"))
                .with_subject("OrderPlaced")
                .with_property("source", "demo"),
        )?;
    }
    for (id, reason) in [(6, "MaxDeliveryCountExceeded"), (7, "ValidationFailed")] {
        broker.seed_dead_letter(
            DEMO_NAMESPACE,
            "orders",
            OutgoingMessage::from_text(&format!(r#"{{"orderId":{id}}}"#))
                .with_message_id(format!("order-{id}")),
            reason,
        )?;
    }

    broker.seed(
        DEMO_NAMESPACE,
        "events",
        OutgoingMessage::from_text("customer signed up").with_subject("CustomerCreated"),
    )?;
    broker.seed(
        DEMO_NAMESPACE,
        "payments",
        OutgoingMessage::from_text("plain text payment note"),
    )?;

    Ok((broker, connection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::*;

    #[test]
    fn test_demo_namespace_is_seeded() {
        let (broker, _) = assert_ok!(seeded_broker());

        assert_eq!(broker.active_messages(DEMO_NAMESPACE, "orders").len(), 5);
        assert_eq!(broker.dead_letter_messages(DEMO_NAMESPACE, "orders").len(), 2);
        assert_eq!(
            broker
                .active_messages(DEMO_NAMESPACE, "events/Subscriptions/billing")
                .len(),
            1
        );
    }
}
