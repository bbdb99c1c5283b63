use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use travel_chat::agent::ChatAgent;
use travel_chat::cli::Args;
use travel_chat::config::prompt::PromptConfig;
use travel_chat::controller::{ TurnController, TurnState };
use travel_chat::history::codec;
use travel_chat::history::session::{ ChatSession, DEFAULT_SAVE_DEBOUNCE, DEFAULT_STORAGE_KEY };
use travel_chat::history::{ MemorySnapshotStore, SnapshotStore };
use travel_chat::llm::chat::scripted::ScriptedChatClient;
use travel_chat::llm::chat::{ ChatClient, CompletionError, GenerationParams };
use travel_chat::models::chat::Role;

fn shared_store() -> (Arc<MemorySnapshotStore>, Arc<dyn SnapshotStore>) {
    let store = Arc::new(MemorySnapshotStore::default());
    let dyn_store: Arc<dyn SnapshotStore> = store.clone();
    (store, dyn_store)
}

fn controller() -> TurnController {
    TurnController::new("You are a travel planner.", GenerationParams::default())
}

async fn settle() {
    tokio::time::sleep(DEFAULT_SAVE_DEBOUNCE + Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn completed_turn_is_persisted_after_debounce() {
    let (store, dyn_store) = shared_store();
    let mut session = ChatSession::new(dyn_store, DEFAULT_STORAGE_KEY, DEFAULT_SAVE_DEBOUNCE);
    session.activate().await;
    let mut controller = controller();
    let client = ScriptedChatClient::tokens(["Kyoto ", "in ", "spring!"]);

    let mut streamed = String::new();
    let reply = controller
        .run_turn(&mut session, &client, "Plan a trip to Kyoto", |t| streamed.push_str(t)).await
        .unwrap()
        .unwrap();

    assert_eq!(streamed, "Kyoto in spring!");
    assert_eq!(reply.content, "Kyoto in spring!");
    assert_eq!(controller.state(), TurnState::Idle);
    assert_eq!(store.write_count(), 0);

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0][0].role, Role::System);
    assert_eq!(requests[0][1].content, "Plan a trip to Kyoto");

    settle().await;
    assert_eq!(store.write_count(), 1);
    let saved = codec::decode(&store.get(DEFAULT_STORAGE_KEY).unwrap()).unwrap();
    assert_eq!(&saved, session.history());
    assert_eq!(saved.chats[0].messages.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_stream_keeps_only_the_user_message() {
    let (store, dyn_store) = shared_store();
    let mut session = ChatSession::new(dyn_store, DEFAULT_STORAGE_KEY, DEFAULT_SAVE_DEBOUNCE);
    let mut controller = controller();
    let client = ScriptedChatClient::failing(["Day 1"], CompletionError::new("HTTP 500: upstream"));

    let result = controller.run_turn(&mut session, &client, "Gift ideas for my dad", |_| {}).await;

    assert!(result.is_err());
    assert_eq!(controller.state(), TurnState::Idle);
    assert_eq!(controller.transcript().len(), 1);
    assert!(controller.last_error().is_some());

    settle().await;
    let saved = codec::decode(&store.get(DEFAULT_STORAGE_KEY).unwrap()).unwrap();
    assert_eq!(saved.chats.len(), 1);
    assert_eq!(saved.chats[0].messages.len(), 1);
    assert_eq!(saved.chats[0].messages[0].role, Role::User);
}

#[tokio::test(start_paused = true)]
async fn reopened_session_restores_history_and_continues_chat() {
    let (store, dyn_store) = shared_store();
    {
        let mut session = ChatSession::new(Arc::clone(&dyn_store), DEFAULT_STORAGE_KEY, DEFAULT_SAVE_DEBOUNCE);
        let mut controller = controller();
        let client = ScriptedChatClient::tokens(["Sure."]);
        controller.run_turn(&mut session, &client, "Weekend in Lisbon", |_| {}).await.unwrap();
        session.flush().await;
    }
    assert_eq!(store.write_count(), 1);

    let mut session = ChatSession::new(dyn_store, DEFAULT_STORAGE_KEY, DEFAULT_SAVE_DEBOUNCE);
    session.activate().await;
    assert_eq!(session.history().chats.len(), 1);
    assert_eq!(session.current_chat().unwrap().title, "Weekend in Lisbon");

    let mut controller = controller();
    assert!(controller.sync_from_session(&session));
    assert_eq!(controller.transcript().len(), 2);

    let client = ScriptedChatClient::tokens(["Pastel de nata."]);
    controller.run_turn(&mut session, &client, "Food tips?", |_| {}).await.unwrap();

    // Earlier messages are sent along as context.
    let request = &client.requests()[0];
    assert_eq!(request.len(), 4);
    assert_eq!(request[2].content, "Sure.");
    assert_eq!(session.current_messages().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn burst_of_changes_is_written_once() {
    let (store, dyn_store) = shared_store();
    let mut session = ChatSession::new(dyn_store, DEFAULT_STORAGE_KEY, DEFAULT_SAVE_DEBOUNCE);
    let mut controller = controller();
    let client = ScriptedChatClient::tokens(["ok"]);

    for prompt in ["one", "two", "three"] {
        controller.run_turn(&mut session, &client, prompt, |_| {}).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.write_count(), 0);

    settle().await;
    assert_eq!(store.write_count(), 1);
    assert_eq!(session.current_messages().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn clearing_everything_removes_the_snapshot() {
    let (store, dyn_store) = shared_store();
    let mut session = ChatSession::new(dyn_store, DEFAULT_STORAGE_KEY, DEFAULT_SAVE_DEBOUNCE);
    let mut controller = controller();
    let client = ScriptedChatClient::tokens(["ok"]);
    controller.run_turn(&mut session, &client, "hello", |_| {}).await.unwrap();
    settle().await;
    assert!(store.get(DEFAULT_STORAGE_KEY).is_some());

    session.clear_all();
    assert!(controller.sync_from_session(&session));
    settle().await;
    assert!(store.get(DEFAULT_STORAGE_KEY).is_none());
    assert!(controller.transcript().is_empty());
}

#[tokio::test]
async fn unreadable_snapshot_is_discarded_on_start() {
    let store = Arc::new(MemorySnapshotStore::with_entry(DEFAULT_STORAGE_KEY, "{\"history\": 42}"));
    let dyn_store: Arc<dyn SnapshotStore> = store.clone();
    let mut session = ChatSession::new(dyn_store, DEFAULT_STORAGE_KEY, DEFAULT_SAVE_DEBOUNCE);
    session.activate().await;

    assert!(session.history().chats.is_empty());
    assert!(store.get(DEFAULT_STORAGE_KEY).is_none());
}

#[tokio::test]
async fn repair_runs_without_a_chat_provider() {
    let raw = r#"{
        "history": [
            {"id": "c1", "title": "Kyoto", "createdAt": "2024-01-01T00:00:00Z",
             "messages": [
                {"id": "m1", "role": "user", "content": "Kyoto", "createdAt": "2024-01-01T00:00:00Z"},
                {"id": "m1", "role": "user", "content": "Kyoto", "createdAt": "2024-01-01T00:00:00Z"}
             ]},
            {"id": "c1", "title": "Kyoto", "createdAt": "2024-01-01T00:00:00Z",
             "messages": [
                {"id": "m1", "role": "user", "content": "Kyoto", "createdAt": "2024-01-01T00:00:00Z"}
             ]}
        ],
        "currentChatId": "c1"
    }"#;
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("chatHistory.json");
    std::fs::write(&snapshot, raw).unwrap();
    let store_dir = dir.path().to_str().unwrap();

    // openai without an API key cannot build a chat client.
    let dry_run = Args::parse_from([
        "travel-chat", "--store-type", "file", "--store-dir", store_dir, "--store-key", "chatHistory",
        "--chat-llm-type", "openai", "--chat-api-key", "", "--repair",
    ]);
    let report = travel_chat::repair_stored_history(&dry_run).await.unwrap().unwrap();
    assert_eq!(report.chats_removed(), 1);
    assert_eq!(std::fs::read_to_string(&snapshot).unwrap(), raw);

    let apply = Args::parse_from([
        "travel-chat", "--store-type", "file", "--store-dir", store_dir, "--store-key", "chatHistory",
        "--chat-llm-type", "openai", "--chat-api-key", "", "--apply-repair",
    ]);
    let applied = travel_chat::repair_stored_history(&apply).await.unwrap().unwrap();
    assert_eq!(applied.history.chats.len(), 1);
    let saved = codec::decode(&std::fs::read_to_string(&snapshot).unwrap()).unwrap();
    assert_eq!(saved.chats[0].messages.len(), 1);
    assert_eq!(saved.current_chat_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn offline_agent_echoes_and_commits() {
    let (_, dyn_store) = shared_store();
    let client: Arc<dyn ChatClient> = Arc::new(ScriptedChatClient::echo());
    let args = Args::parse_from(["travel-chat", "--store-type", "memory"]);
    let mut agent = ChatAgent::with_parts(&args, dyn_store, client, PromptConfig::default());
    agent.start().await;

    let reply = agent.send("Tokyo in May", |_| {}).await.unwrap().unwrap();
    assert_eq!(reply.content, "(offline) You said: Tokyo in May");
    assert_eq!(agent.session.current_messages().len(), 2);
    agent.shutdown().await;
}
