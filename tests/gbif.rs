use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;

use kira_taxonomy::config::GbifConfig;
use kira_taxonomy::error::KiraError;
use kira_taxonomy::gbif::{self, GbifClient, GbifHttpClient};
use kira_taxonomy::pipeline::{Pipeline, Transport};

const BASE: &str = "http://gbif.test/v1/";

type Script = HashMap<String, VecDeque<Result<String, KiraError>>>;

#[derive(Clone, Default)]
struct Scripted {
    script: Arc<Mutex<Script>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    fn answer(&self, url: &str, body: Result<&str, KiraError>) {
        self.script
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(body.map(str::to_string));
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Transport for Scripted {
    fn get(&mut self, url: &str) -> Result<String, KiraError> {
        self.seen.lock().unwrap().push(url.to_string());
        self.script
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(KiraError::GbifStatus {
                    status: 404,
                    message: "not found".to_string(),
                })
            })
    }
}

fn config(retries: usize) -> GbifConfig {
    GbifConfig {
        base_url: "http://gbif.test/v1".to_string(),
        retries,
        timeout_secs: 1,
        wait_ms: 0,
        buffer: 2,
    }
}

fn client(transport: &Scripted, retries: usize) -> GbifHttpClient {
    let config = config(retries);
    let pipeline = Pipeline::spawn(transport.clone(), Duration::ZERO, config.buffer).unwrap();
    GbifHttpClient::with_pipeline(Arc::new(pipeline), &config)
}

#[test]
fn fetch_by_id_decodes_record() {
    let transport = Scripted::default();
    transport.answer(
        &format!("{BASE}species/5219404"),
        Ok(r#"{"key":5219404,"nubKey":5219404,"parentKey":2435194,
              "canonicalName":"Panthera leo","rank":"SPECIES","taxonomicStatus":"ACCEPTED"}"#),
    );
    let client = client(&transport, 3);

    let record = client.fetch_by_id(5219404).unwrap();

    assert_eq!(record.name(), "Panthera leo");
    assert_eq!(record.parent_key, 2435194);
    assert_eq!(transport.seen(), vec![format!("{BASE}species/5219404")]);
}

#[test]
fn list_follows_pages_and_keeps_backbone_records() {
    let transport = Scripted::default();
    transport.answer(
        &format!("{BASE}species?name=Panthera+leo&offset=0"),
        Ok(r#"{"offset":0,"limit":2,"endOfRecords":false,"results":[
              {"key":5219404,"nubKey":5219404,"canonicalName":"Panthera leo"},
              {"key":100,"nubKey":5219404,"canonicalName":"Panthera leo"}]}"#),
    );
    transport.answer(
        &format!("{BASE}species?name=Panthera+leo&offset=2"),
        Ok(r#"{"offset":2,"limit":2,"endOfRecords":true,"results":[
              {"key":8000001,"nubKey":8000001,"canonicalName":"Panthera leo"},
              {"key":101,"canonicalName":"Panthera leo"}]}"#),
    );
    let client = client(&transport, 3);

    let records = client.fetch_by_name("Panthera  leo").unwrap();

    let keys = records.iter().map(|record| record.key).collect::<Vec<_>>();
    assert_eq!(keys, vec![5219404, 8000001]);
    assert_eq!(transport.seen().len(), 2);
}

#[test]
fn children_and_synonyms_use_offset_pages() {
    let transport = Scripted::default();
    transport.answer(
        &format!("{BASE}species/2435194/children?offset=0"),
        Ok(r#"{"offset":0,"limit":20,"endOfRecords":true,"results":[
              {"key":5219404,"nubKey":5219404,"canonicalName":"Panthera leo"}]}"#),
    );
    transport.answer(
        &format!("{BASE}species/5219404/synonyms?offset=0"),
        Ok(r#"{"offset":0,"limit":20,"endOfRecords":true,"results":[]}"#),
    );
    let client = client(&transport, 3);

    assert_eq!(client.fetch_children(2435194).unwrap().len(), 1);
    assert!(client.fetch_synonyms(5219404).unwrap().is_empty());
}

#[test]
fn failures_are_retried_until_success() {
    let transport = Scripted::default();
    let url = format!("{BASE}species/1");
    transport.answer(&url, Err(KiraError::GbifHttp("connection reset".to_string())));
    transport.answer(&url, Ok("<html>busy</html>"));
    transport.answer(&url, Ok(r#"{"key":1,"nubKey":1,"canonicalName":"Animalia"}"#));
    let client = client(&transport, 3);

    let record = client.fetch_by_id(1).unwrap();

    assert_eq!(record.name(), "Animalia");
    assert_eq!(transport.seen().len(), 3);
}

#[test]
fn retries_run_out() {
    let transport = Scripted::default();
    let client = client(&transport, 3);

    let err = client.fetch_by_id(2).unwrap_err();

    assert_matches!(err, KiraError::TransportExhausted { retries: 3, message } if message.contains("404"));
    assert_eq!(transport.seen().len(), 3);
}

#[test]
fn zero_retries_is_no_answer() {
    let transport = Scripted::default();
    let client = client(&transport, 0);

    let err = client.fetch_by_id(2).unwrap_err();

    assert_matches!(err, KiraError::NoAnswer { retries: 0 });
    assert!(transport.seen().is_empty());
}

#[test]
fn empty_queries_are_rejected() {
    let transport = Scripted::default();
    let client = client(&transport, 3);

    assert_matches!(client.fetch_by_id(0), Err(KiraError::InvalidQuery(_)));
    assert_matches!(client.fetch_by_name("  \t"), Err(KiraError::InvalidQuery(_)));
    assert!(transport.seen().is_empty());
}

#[test]
fn concurrent_callers_get_their_own_answers() {
    let transport = Scripted::default();
    for key in 1..=6u64 {
        transport.answer(
            &format!("{BASE}species/{key}"),
            Ok(format!(r#"{{"key":{key},"nubKey":{key},"canonicalName":"Taxon"}}"#).as_str()),
        );
    }
    let client = client(&transport, 1);

    thread::scope(|scope| {
        for key in 1..=6u64 {
            let client = client.clone();
            scope.spawn(move || {
                assert_eq!(client.fetch_by_id(key).unwrap().key, key);
            });
        }
    });
    assert_eq!(transport.seen().len(), 6);
}

#[test]
fn open_shares_one_pipeline() {
    let config = GbifConfig::default();
    let first = gbif::open(&config).unwrap();
    let second = gbif::open(&config).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}
