//! Peer-to-peer messaging between sibling agents.

mod common;

use canopy_orchestrator::{Agent, AgentOrchestrator, AgentStatus};
use common::{tool_messages, ScriptedClient};

/// Each agent holds half of a hash, sends its half to the other, waits for
/// the peer's half, and finishes with the full value.
#[tokio::test]
async fn peers_exchange_halves_and_assemble_hash() {
    let orchestrator = AgentOrchestrator::with_defaults();

    let client_a = ScriptedClient::new("gpt-4")
        .reply("Thought: share my prefix\nAction: send_message\nTo: AgentB\nContent: prefix ab12")
        .reply("Action: wait")
        .reply("Action: finish\nContent: ab12cd34");
    let history_a = client_a.history_handle();

    let client_b = ScriptedClient::new("gpt-4")
        .reply("Thought: share my suffix\nAction: send_message\nTo: AgentA\nContent: suffix cd34")
        .reply("Action: wait")
        .reply("Action: finish\nContent: ab12cd34");
    let history_b = client_b.history_handle();

    let agent_a = Agent::new("AgentA", client_a.boxed());
    let agent_b = Agent::new("AgentB", client_b.boxed());

    // Register both before launching either so sends always find a mailbox.
    let id_a = orchestrator.register(agent_a);
    let id_b = orchestrator.register(agent_b);
    orchestrator.launch(&id_a, "Your half is ab12; AgentB has the rest", None).unwrap();
    orchestrator.launch(&id_b, "Your half is cd34; AgentA has the rest", None).unwrap();

    let response_a = orchestrator.wait_for_completion(&id_a).await.unwrap();
    let response_b = orchestrator.wait_for_completion(&id_b).await.unwrap();

    assert!(response_a.success);
    assert!(response_b.success);
    assert_eq!(response_a.content, "ab12cd34");
    assert_eq!(response_b.content, "ab12cd34");

    // Each side saw one send confirmation and one received peer message.
    for (history, expected) in [(&history_a, "suffix cd34"), (&history_b, "prefix ab12")] {
        let observations = tool_messages(history);
        let sends: Vec<_> =
            observations.iter().filter(|o| o.contains("Message sent to")).collect();
        let receipts: Vec<_> =
            observations.iter().filter(|o| o.contains("[MESSAGE from")).collect();
        assert_eq!(sends.len(), 1, "expected one send confirmation: {observations:?}");
        assert_eq!(receipts.len(), 1, "expected one received message: {observations:?}");
        assert!(receipts[0].contains(expected));
    }

    assert_eq!(orchestrator.status(&id_a), Some(AgentStatus::Completed));
    assert_eq!(orchestrator.status(&id_b), Some(AgentStatus::Completed));

    orchestrator.shutdown().await;
}

/// Name-based recipient resolution delivers to the unique live agent with
/// that name; unknown names surface as an error observation, not a crash.
#[tokio::test]
async fn send_to_unknown_peer_becomes_error_observation() {
    let orchestrator = AgentOrchestrator::with_defaults();

    let client = ScriptedClient::new("gpt-4")
        .reply("Action: send_message\nTo: Nobody\nContent: hello?")
        .reply("Action: finish\nContent: gave up");
    let history = client.history_handle();

    let response = Agent::new("loner", client.boxed())
        .run(&orchestrator, "talk to Nobody")
        .await
        .unwrap();

    assert!(response.success, "send failure is recoverable, agent still finishes");
    let observations = tool_messages(&history);
    assert!(
        observations.iter().any(|o| o.contains("Error sending message to Nobody")),
        "missing error observation: {observations:?}"
    );

    orchestrator.shutdown().await;
}
