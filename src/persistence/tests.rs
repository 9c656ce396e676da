use super::Persistence;
use crate::broker::Message;
use tempfile::tempdir;

#[test]
fn test_store_and_load_message() {
    let dir = tempdir().unwrap();
    let persistence = Persistence::new(dir.path()).unwrap();
    let message = Message::new("hello").persistent(true);

    persistence.store_message("tasks", 7, &message).unwrap();
    let messages = persistence.load_messages("tasks").unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, 7);
    assert_eq!(messages[0].1, message);
}

#[test]
fn test_load_follows_sequence_order() {
    let dir = tempdir().unwrap();
    let persistence = Persistence::new(dir.path()).unwrap();

    for seq in [300u64, 2, 45] {
        let message = Message::new(format!("msg{seq}")).persistent(true);
        persistence.store_message("tasks", seq, &message).unwrap();
    }

    let seqs: Vec<u64> = persistence
        .load_messages("tasks")
        .unwrap()
        .into_iter()
        .map(|(seq, _)| seq)
        .collect();
    assert_eq!(seqs, vec![2, 45, 300]);
}

#[test]
fn test_remove_message() {
    let dir = tempdir().unwrap();
    let persistence = Persistence::new(dir.path()).unwrap();

    persistence
        .store_message("tasks", 1, &Message::new("a"))
        .unwrap();
    persistence
        .store_message("tasks", 2, &Message::new("b"))
        .unwrap();
    persistence.remove_message("tasks", 1).unwrap();

    let messages = persistence.load_messages("tasks").unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1.payload, b"b".to_vec());
}

#[test]
fn test_empty_queue_returns_empty_vec() {
    let dir = tempdir().unwrap();
    let persistence = Persistence::new(dir.path()).unwrap();
    assert!(persistence.load_messages("nonexistent").unwrap().is_empty());
}

#[test]
fn test_flushed_messages_survive_reopen() {
    let dir = tempdir().unwrap();
    let message = Message::new("durable").persistent(true);
    {
        let persistence = Persistence::new(dir.path()).unwrap();
        persistence.store_message("tasks", 1, &message).unwrap();
        persistence.flush().unwrap();
    }

    let reopened = Persistence::new(dir.path()).unwrap();
    assert_eq!(reopened.load_messages("tasks").unwrap(), vec![(1, message)]);
}
