use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message as Frame};

use fedsum_core::{
    crypto::{EncryptKeyPair, Envelope, PublicEncryptKey},
    message::Message,
    model::{ModelWeights, PrivatePart, SumObject, Weights},
    testutils::{private_part, small_shapes},
};
use fedsum_sdk::{
    settings::ParticipantSettings,
    Agent,
    AgentError,
    PassiveNotifier,
    PhaseName,
    StartOutcome,
};

/// Plays the coordinator of a party of two for a single connection.
///
/// The other member is simulated: its piece is sent right after the enrollment. Returns every
/// message the participant sent.
async fn scripted_coordinator(
    listener: TcpListener,
    friend: EncryptKeyPair,
    friend_piece: PrivatePart,
) -> Vec<Message> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = accept_async(stream).await.unwrap();
    let friend_id = friend.public.export();

    let mut received = Vec::new();
    while let Some(Ok(frame)) = socket.next().await {
        let message = match frame {
            Frame::Text(text) => Message::decode(&text).unwrap(),
            Frame::Close(_) => break,
            _ => continue,
        };
        let replies = match &message {
            Message::Enroll { encoded_public_key } => {
                let key = PublicEncryptKey::import(encoded_public_key).unwrap();
                let payload = serde_json::to_vec(&friend_piece.to_sum_object()).unwrap();
                let envelope = key.encrypt(&payload).unwrap();
                vec![
                    Message::Configuration {
                        number_of_friends: 2,
                        round: 0,
                    },
                    Message::Enroll {
                        encoded_public_key: friend_id.clone(),
                    },
                    Message::piece(friend_id.clone(), encoded_public_key.clone(), &envelope),
                ]
            }
            Message::GetModel => vec![Message::Model {
                model: ModelWeights::from(&Weights::filled(&small_shapes(), 3.0)),
            }],
            _ => Vec::new(),
        };
        received.push(message);
        for reply in replies {
            socket.send(Frame::Text(reply.encode())).await.unwrap();
        }
    }
    received
}

/// Accepts a single connection and closes it as soon as a model is requested.
async fn closing_coordinator(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = accept_async(stream).await.unwrap();
    while let Some(Ok(frame)) = socket.next().await {
        if let Frame::Text(text) = frame {
            if Message::decode(&text).unwrap() == Message::GetModel {
                break;
            }
        }
    }
    let _ = socket.close(None).await;
}

fn settings(address: std::net::SocketAddr) -> ParticipantSettings {
    let url = format!("ws://{}", address).parse().unwrap();
    ParticipantSettings {
        url,
        settle_delay: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn test_agent_round() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let friend = EncryptKeyPair::generate().unwrap();
    let friend_piece = private_part(&small_shapes(), 4);
    let coordinator = tokio::spawn(scripted_coordinator(
        listener,
        friend.clone(),
        friend_piece.clone(),
    ));

    let agent = Agent::connect(settings(address), PassiveNotifier)
        .await
        .unwrap();
    assert_eq!(agent.state(), PhaseName::Connected);
    let public_key = agent.enroll().await.unwrap();

    let update = private_part(&small_shapes(), 7);
    while let StartOutcome::RosterIncomplete { .. } = agent.start(update.clone()).await.unwrap() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // the friend's piece arrived before the start, so the partial sum is sent right away
    agent.wait_for(PhaseName::PartialSumSubmitted).await.unwrap();
    let model = agent.wait_for_model().await.unwrap();
    assert!(model.weight_data.iter().flatten().all(|x| *x == 3.0));
    assert_eq!(agent.latest_model(), Some(model.clone()));
    assert_eq!(agent.retrieve_model().await.unwrap(), model);

    agent.disconnect().await;
    let received = coordinator.await.unwrap();
    assert_eq!(
        received[0],
        Message::Enroll {
            encoded_public_key: public_key.clone()
        }
    );

    // the piece sent to the friend plus the partial sum make up both updates
    let sent_piece = received
        .iter()
        .find_map(|message| match message {
            Message::SendPiece { from, to, piece } => {
                assert_eq!(from, &public_key);
                assert_eq!(to, &friend.public.export());
                let envelope = Envelope::from_wire(piece).unwrap();
                let plaintext = friend.secret.decrypt(&envelope).unwrap();
                let piece: SumObject = serde_json::from_slice(&plaintext).unwrap();
                Some(piece.into_part(&small_shapes()).unwrap())
            }
            _ => None,
        })
        .unwrap();
    let partial_sum = received
        .iter()
        .find_map(|message| match message {
            Message::SendPartialSum { partial_sum, .. } => {
                Some(partial_sum.clone().into_part(&small_shapes()).unwrap())
            }
            _ => None,
        })
        .unwrap();

    assert_eq!(
        sent_piece.trained_batches.wrapping_add(partial_sum.trained_batches),
        11
    );
    let total = sent_piece.model_weights.add(&partial_sum.model_weights).unwrap();
    assert!(total
        .iter()
        .flat_map(|t| t.data())
        .all(|x| (x - 11.0).abs() < 1e-3));
    assert!(received.contains(&Message::GetModel));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    assert!(matches!(
        Agent::connect(settings(address), PassiveNotifier).await,
        Err(AgentError::Connect(_))
    ));
}

#[tokio::test]
async fn test_model_unavailable_after_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let coordinator = tokio::spawn(closing_coordinator(listener));

    let agent = Agent::connect(settings(address), PassiveNotifier)
        .await
        .unwrap();
    assert!(matches!(
        agent.retrieve_model().await,
        Err(AgentError::ModelUnavailable)
    ));
    coordinator.await.unwrap();

    agent.wait_for(PhaseName::Disconnected).await.unwrap();
    assert!(matches!(
        agent.wait_for_model().await,
        Err(AgentError::ModelUnavailable)
    ));
    assert!(agent.latest_model().is_none());
    assert!(matches!(
        agent.retrieve_model().await,
        Err(AgentError::ModelUnavailable)
    ));
}
