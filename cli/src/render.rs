use server::coordinator::TabHeaders;
use server::model::{EntityTree, Message, MessageCollection};

const BODY_PREVIEW: usize = 60;

pub fn print_tree(tree: &EntityTree) {
    if tree.is_empty() {
        println!("(no matching entities)");
        return;
    }
    for resource in tree.resources() {
        println!(
            "{} (created {})",
            resource.name,
            resource.created_at.format("%Y-%m-%d")
        );
        for topic in tree.topics_of(resource.id) {
            println!("  [topic] {}", topic.name);
            for subscription in tree.subscriptions_of(topic.id) {
                println!(
                    "    [subscription] {} {}",
                    subscription.name,
                    counts(&subscription.collection)
                );
            }
        }
        for queue in tree.queues_of(resource.id) {
            println!("  [queue] {} {}", queue.name, counts(&queue.collection));
        }
    }
}

fn counts(collection: &MessageCollection) -> String {
    format!("({} / dlq {})", collection.message_count, collection.dlq_count)
}

pub fn print_headers(headers: &TabHeaders) {
    println!(
        "{} | {} | {} | {}",
        headers.topics, headers.queues, headers.messages, headers.dead_letters
    );
}

pub fn print_messages(messages: &[Message]) {
    if messages.is_empty() {
        println!("(no messages)");
        return;
    }
    println!(
        "{:>10}  {:<36}  {:>5}  {:<19}  {:<20}  BODY",
        "SEQUENCE", "MESSAGE ID", "DLVR", "ENQUEUED", "SUBJECT / REASON"
    );
    for message in messages {
        let label = if message.is_dlq {
            message.dead_letter_reason.as_str()
        } else {
            message.subject.as_deref().unwrap_or("")
        };
        println!(
            "{:>10}  {:<36}  {:>5}  {:<19}  {:<20}  {}",
            message.sequence_number,
            message.message_id,
            message.delivery_count,
            message
                .enqueued_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            label,
            preview(&message.content())
        );
    }
}

pub fn print_message(message: &Message) {
    println!("Message {} (sequence {})", message.message_id, message.sequence_number);
    if let Some(correlation_id) = &message.correlation_id {
        println!("  correlation id: {correlation_id}");
    }
    if let Some(content_type) = &message.content_type {
        println!("  content type:   {content_type}");
    }
    for (key, value) in &message.application_properties {
        println!("  {key} = {value}");
    }
    println!("{}", message.body.display());
}

fn preview(body: &str) -> String {
    let flat: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > BODY_PREVIEW {
        let cut: String = flat.chars().take(BODY_PREVIEW).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("{\n  \"a\": 1\n}"), "{ \"a\": 1 }");
        let long = "x".repeat(100);
        assert_eq!(preview(&long).len(), BODY_PREVIEW + 3);
    }
}
