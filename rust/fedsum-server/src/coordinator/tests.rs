use tokio::sync::mpsc::UnboundedReceiver;

use fedsum_core::{
    message::Message,
    model::{ModelWeights, PrivatePart, SumObject, Weights},
    share::{assemble_parts, split_part},
    testutils::{private_part, small_shapes},
};

use super::{
    connection::Connection,
    history::LayerId,
    requests::{
        CoordinatorRequest,
        DisconnectRequest,
        EnrollRequest,
        PartialSumRequest,
        RelayRequest,
        RequestError,
    },
    Coordinator,
};
use crate::settings::{ModelSettings, PartySettings};

struct TestParticipant {
    key: String,
    connection: Connection,
    rx: UnboundedReceiver<Message>,
}

impl TestParticipant {
    fn new(key: &str) -> Self {
        let (connection, rx) = Connection::new();
        Self {
            key: key.to_string(),
            connection,
            rx,
        }
    }

    fn enroll(&self) -> CoordinatorRequest {
        EnrollRequest {
            public_key: self.key.clone(),
            connection: self.connection.clone(),
        }
        .into()
    }

    fn partial_sum(&self, part: &PrivatePart) -> CoordinatorRequest {
        self.partial_sum_in(part, 0)
    }

    fn partial_sum_in(&self, part: &PrivatePart, round: u64) -> CoordinatorRequest {
        PartialSumRequest {
            connection_id: self.connection.id(),
            from: self.key.clone(),
            partial_sum: part.to_sum_object().with_round(round),
        }
        .into()
    }

    fn disconnect(&self) -> CoordinatorRequest {
        DisconnectRequest {
            connection_id: self.connection.id(),
        }
        .into()
    }

    fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

fn coordinator(size: usize, evict_on_disconnect: bool) -> Coordinator {
    let party = PartySettings {
        size,
        evict_on_disconnect,
    };
    let model = ModelSettings {
        shapes: small_shapes(),
        initial_value: 1.0,
    };
    Coordinator::new(party, model).0
}

fn enroll_all(coordinator: &mut Coordinator, keys: &[&str]) -> Vec<TestParticipant> {
    keys.iter()
        .map(|key| {
            let participant = TestParticipant::new(key);
            coordinator.handle_request(participant.enroll()).unwrap();
            participant
        })
        .collect()
}

/// Computes the partial sums a party of honest participants would submit.
fn partial_sums(parts: &[PrivatePart]) -> Vec<PrivatePart> {
    let n = parts.len();
    let pieces = parts
        .iter()
        .map(|part| split_part(part, n).unwrap())
        .collect::<Vec<_>>();
    // participant i collects piece i of every participant
    (0..n)
        .map(|i| {
            let collected = pieces.iter().map(|p| p[i].clone()).collect::<Vec<_>>();
            assemble_parts(&collected).unwrap()
        })
        .collect()
}

#[test]
fn test_enroll_introduces_party_members() {
    let mut coordinator = coordinator(3, false);
    let mut participants = enroll_all(&mut coordinator, &["a", "b", "c"]);

    let configuration = Message::Configuration {
        number_of_friends: 3,
        round: 0,
    };
    let enroll = |key: &str| Message::Enroll {
        encoded_public_key: key.to_string(),
    };
    assert_eq!(
        participants[0].drain(),
        vec![configuration.clone(), enroll("b"), enroll("c")]
    );
    assert_eq!(
        participants[1].drain(),
        vec![configuration.clone(), enroll("a"), enroll("c")]
    );
    assert_eq!(
        participants[2].drain(),
        vec![configuration, enroll("a"), enroll("b")]
    );
}

#[test]
fn test_enroll_party_formation() {
    let mut coordinator = coordinator(3, false);
    let mut participants = enroll_all(&mut coordinator, &["a", "b", "c", "d"]);
    assert_eq!(coordinator.parties().len(), 2);

    // the fourth participant is alone in its party
    assert_eq!(
        participants[3].drain(),
        vec![Message::Configuration {
            number_of_friends: 3,
            round: 0,
        }]
    );
}

#[test]
fn test_enroll_twice() {
    let mut coordinator = coordinator(3, false);
    let participants = enroll_all(&mut coordinator, &["a"]);
    assert!(matches!(
        coordinator.handle_request(participants[0].enroll()),
        Err(RequestError::AlreadyEnrolled)
    ));
}

#[test]
fn test_relay() {
    let mut coordinator = coordinator(2, false);
    let mut participants = enroll_all(&mut coordinator, &["a", "b"]);
    participants.iter_mut().for_each(|p| {
        p.drain();
    });

    let relay = RelayRequest {
        from: "a".to_string(),
        to: "b".to_string(),
        piece: "opaque".to_string(),
    };
    coordinator.handle_request(relay.into()).unwrap();
    assert_eq!(
        participants[1].drain(),
        vec![Message::SendPiece {
            from: "a".to_string(),
            to: "b".to_string(),
            piece: "opaque".to_string(),
        }]
    );
    assert!(participants[0].drain().is_empty());

    // unknown recipients are ignored
    let relay = RelayRequest {
        from: "a".to_string(),
        to: "z".to_string(),
        piece: "opaque".to_string(),
    };
    assert!(coordinator.handle_request(relay.into()).is_ok());
}

#[test]
fn test_partial_sums_append_layer() {
    let mut coordinator = coordinator(3, false);
    let participants = enroll_all(&mut coordinator, &["a", "b", "c"]);
    let parts = [9, 10, 11]
        .iter()
        .map(|batches| private_part(&small_shapes(), *batches))
        .collect::<Vec<_>>();
    let sums = partial_sums(&parts);

    coordinator
        .handle_request(participants[0].partial_sum(&sums[0]))
        .unwrap();
    coordinator
        .handle_request(participants[1].partial_sum(&sums[1]))
        .unwrap();
    assert_eq!(coordinator.history().len(), 1);

    coordinator
        .handle_request(participants[2].partial_sum(&sums[2]))
        .unwrap();
    assert_eq!(coordinator.history().len(), 2);

    let layer = coordinator.history().newest();
    assert_eq!(layer.parent, Some(LayerId::from(0)));
    let total = layer.sum_of_partials.as_ref().unwrap();
    assert_eq!(total.trained_batches, 30);
    let first = total.model_weights[0].data()[0];
    assert!(29.0 < first && first < 31.0);

    // unit root plus an average contribution of 10
    assert!(layer
        .weights
        .iter()
        .flat_map(|t| t.data())
        .all(|x| (x - 11.0).abs() < 1e-3));
    assert!(coordinator
        .parties()
        .iter()
        .next()
        .unwrap()
        .is_completed());
}

#[test]
fn test_model_event_published() {
    let party = PartySettings {
        size: 2,
        evict_on_disconnect: false,
    };
    let model = ModelSettings {
        shapes: small_shapes(),
        initial_value: 1.0,
    };
    let (mut coordinator, _sender, subscriber) = Coordinator::new(party, model);
    let listener = subscriber.model_listener();
    let initial = listener.get_latest();
    assert_eq!(initial.layer_id, LayerId::from(0));
    assert_eq!(
        *initial.event,
        ModelWeights::from(&Weights::filled(&small_shapes(), 1.0))
    );

    let participants = enroll_all(&mut coordinator, &["a", "b"]);
    let sums = partial_sums(&[
        private_part(&small_shapes(), 2),
        private_part(&small_shapes(), 2),
    ]);
    for (participant, sum) in participants.iter().zip(&sums) {
        coordinator
            .handle_request(participant.partial_sum(sum))
            .unwrap();
    }

    let latest = listener.get_latest();
    assert_eq!(latest.layer_id, LayerId::from(1));
    // 1 + (2 + 2) / 2
    assert!(latest
        .event
        .weight_data
        .iter()
        .flatten()
        .all(|x| (x - 3.0).abs() < 1e-4));
}

#[test]
fn test_barrier_fires_once_per_party() {
    let mut coordinator = coordinator(2, false);
    let participants = enroll_all(&mut coordinator, &["a", "b", "c", "d"]);
    let part = private_part(&small_shapes(), 1);

    // both parties complete in interleaved order
    for i in &[0, 2, 1, 3] {
        coordinator
            .handle_request(participants[*i].partial_sum(&part))
            .unwrap();
    }
    assert_eq!(coordinator.history().len(), 3);
    assert_eq!(coordinator.history().root().children.len(), 1);

    // a late resubmission doesn't produce another layer
    assert!(matches!(
        coordinator.handle_request(participants[0].partial_sum(&part)),
        Err(RequestError::AlreadySubmitted)
    ));
    assert_eq!(coordinator.history().len(), 3);
}

#[test]
fn test_partial_sum_validation() {
    let mut coordinator = coordinator(2, false);
    let participants = enroll_all(&mut coordinator, &["a", "b"]);

    // wrong shapes
    let req = PartialSumRequest {
        connection_id: participants[0].connection.id(),
        from: "a".to_string(),
        partial_sum: SumObject {
            trained_batches: 1,
            model_weights: vec![vec![1.0]],
            round: 0,
        },
    };
    assert!(matches!(
        coordinator.handle_request(req.into()),
        Err(RequestError::InvalidPartialSum(_))
    ));

    // claiming somebody else's identity
    let part = private_part(&small_shapes(), 1);
    let req = PartialSumRequest {
        connection_id: participants[1].connection.id(),
        from: "a".to_string(),
        partial_sum: part.to_sum_object(),
    };
    assert!(matches!(
        coordinator.handle_request(req.into()),
        Err(RequestError::ConnectionMismatch)
    ));

    let stranger = TestParticipant::new("z");
    assert!(matches!(
        coordinator.handle_request(stranger.partial_sum(&part)),
        Err(RequestError::UnknownParticipant)
    ));
}

#[test]
fn test_disconnect_without_eviction() {
    let mut coordinator = coordinator(2, false);
    let mut participants = enroll_all(&mut coordinator, &["a", "b"]);
    participants[0].drain();

    coordinator
        .handle_request(participants[1].disconnect())
        .unwrap();
    assert!(participants[0].drain().is_empty());
    assert_eq!(coordinator.parties().iter().next().unwrap().len(), 2);
}

#[test]
fn test_disconnect_with_eviction() {
    let mut coordinator = coordinator(3, true);
    let mut participants = enroll_all(&mut coordinator, &["a", "b", "c"]);
    let part = private_part(&small_shapes(), 1);
    coordinator
        .handle_request(participants[0].partial_sum(&part))
        .unwrap();
    participants.iter_mut().for_each(|p| {
        p.drain();
    });

    coordinator
        .handle_request(participants[2].disconnect())
        .unwrap();
    let leave = Message::Leave {
        encoded_public_key: "c".to_string(),
        round: 1,
    };
    assert_eq!(participants[0].drain(), vec![leave.clone()]);
    assert_eq!(participants[1].drain(), vec![leave]);

    // the free slot is taken by the next participant, which joins the new round
    let mut late = enroll_all(&mut coordinator, &["d"]);
    assert_eq!(coordinator.parties().len(), 1);
    let messages = late[0].drain();
    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages[0],
        Message::Configuration {
            number_of_friends: 3,
            round: 1,
        }
    );

    // the discarded partial sum can be submitted again for the new round
    coordinator
        .handle_request(participants[0].partial_sum_in(&part, 1))
        .unwrap();
}

#[test]
fn test_stale_partial_sum_after_eviction() {
    let mut coordinator = coordinator(3, true);
    let mut participants = enroll_all(&mut coordinator, &["a", "b", "c"]);
    coordinator
        .handle_request(participants[2].disconnect())
        .unwrap();

    // `a` finished the aborted round before it saw the `leave`
    let stale = private_part(&small_shapes(), 500);
    assert!(matches!(
        coordinator.handle_request(participants[0].partial_sum(&stale)),
        Err(RequestError::StaleRound(0, 1))
    ));

    participants.truncate(2);
    participants.extend(enroll_all(&mut coordinator, &["d"]));
    let parts = [1, 1, 1]
        .iter()
        .map(|batches| private_part(&small_shapes(), *batches))
        .collect::<Vec<_>>();
    for (participant, sum) in participants.iter().zip(&partial_sums(&parts)) {
        coordinator
            .handle_request(participant.partial_sum_in(sum, 1))
            .unwrap();
    }

    assert_eq!(coordinator.history().len(), 2);
    let layer = coordinator.history().newest();
    let total = layer.sum_of_partials.as_ref().unwrap();
    assert_eq!(total.trained_batches, 3);
}

#[test]
fn test_disconnect_unknown_connection() {
    let mut coordinator = coordinator(2, true);
    let stranger = TestParticipant::new("z");
    assert!(coordinator.handle_request(stranger.disconnect()).is_ok());
}

#[tokio::test]
async fn test_run() {
    let party = PartySettings {
        size: 2,
        evict_on_disconnect: false,
    };
    let model = ModelSettings {
        shapes: small_shapes(),
        initial_value: 1.0,
    };
    let (coordinator, sender, _subscriber) = Coordinator::new(party, model);
    let handle = tokio::spawn(coordinator.run());

    let participant = TestParticipant::new("a");
    sender
        .request(participant.enroll(), tracing::Span::none())
        .await
        .unwrap();
    assert!(matches!(
        sender
            .request(participant.enroll(), tracing::Span::none())
            .await,
        Err(RequestError::AlreadyEnrolled)
    ));

    drop(sender);
    handle.await.unwrap();
}
